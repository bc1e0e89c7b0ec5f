//! Kernel event-queue backend (`kqueue` on macOS and the BSDs).
//!
//! kqueue expresses interest as separate read/write filters added and
//! deleted incrementally, so `modify` diffs the requested mask against
//! the mask stored in the registration table and issues only the
//! needed `EV_ADD`/`EV_DELETE` operations. `EV_ERROR`/`EV_EOF` are
//! translated into read-and-write readiness.

use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

use crate::config::Config;
use crate::error::Result;
use crate::poll::{Fired, Interest, MaskTable, Poll};

pub struct KqueuePoll {
    kq: RawFd,
    events: Vec<libc::kevent>,
    fired: Vec<Fired>,
    masks: MaskTable,
}

impl KqueuePoll {
    pub fn new(config: &Config) -> Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self {
            kq,
            events: Vec::with_capacity(config.wait_capacity),
            fired: Vec::with_capacity(config.wait_capacity),
            masks: MaskTable::new(config.max_peers),
        })
    }

    fn change(&self, fd: RawFd, filter: i16, flags: u16) {
        let ke = libc::kevent {
            ident: fd as libc::uintptr_t,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };
        let rc = unsafe { libc::kevent(self.kq, &ke, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            tracing::error!(
                fd,
                filter,
                error = %io::Error::last_os_error(),
                "kevent change failed"
            );
        }
    }

    /// Apply the filter delta between `prev` and `next` for `fd`.
    fn apply(&self, fd: RawFd, prev: Interest, next: Interest) {
        if prev.read != next.read {
            let flags = if next.read { libc::EV_ADD } else { libc::EV_DELETE };
            self.change(fd, libc::EVFILT_READ, flags);
        }
        if prev.write != next.write {
            let flags = if next.write { libc::EV_ADD } else { libc::EV_DELETE };
            self.change(fd, libc::EVFILT_WRITE, flags);
        }
    }
}

impl Poll for KqueuePoll {
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.masks.check(fd)?;
        self.apply(fd, Interest::NONE, interest);
        self.masks.set(fd, interest);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.masks.check(fd)?;
        let prev = self.masks.get(fd);
        self.apply(fd, prev, interest);
        self.masks.set(fd, interest);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> Result<()> {
        self.masks.check(fd)?;
        let prev = self.masks.get(fd);
        self.apply(fd, prev, Interest::NONE);
        self.masks.clear(fd);
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> Result<usize> {
        let ts;
        let ts_ptr = if timeout_ms >= 0 {
            ts = libc::timespec {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_nsec: (timeout_ms % 1000) as libc::c_long * 1_000_000,
            };
            &ts as *const libc::timespec
        } else {
            ptr::null()
        };

        // SAFETY: the kernel writes up to capacity entries; the length
        // is clamped to the returned count right after.
        unsafe {
            self.events.set_len(0);
        }
        let n = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                ts_ptr,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                self.fired.clear();
                return Ok(0);
            }
            return Err(err.into());
        }
        unsafe {
            self.events.set_len(n as usize);
        }

        self.fired.clear();
        for ke in &self.events {
            let failed = ke.flags & (libc::EV_ERROR | libc::EV_EOF) != 0;
            let interest = Interest {
                read: failed || ke.filter == libc::EVFILT_READ,
                write: failed || ke.filter == libc::EVFILT_WRITE,
            };
            self.fired.push(Fired {
                fd: ke.ident as RawFd,
                interest,
            });
        }
        Ok(self.fired.len())
    }

    fn fired(&self) -> &[Fired] {
        &self.fired
    }

    fn mask(&self, fd: RawFd) -> Interest {
        self.masks.get(fd)
    }
}

impl Drop for KqueuePoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}
