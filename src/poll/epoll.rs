//! Persistent kernel event table backend (Linux `epoll`).
//!
//! Interest is expressed as an absolute mask per descriptor, so
//! `modify` is a single `EPOLL_CTL_MOD` with the requested mask and no
//! diffing is needed. `EPOLLERR`/`EPOLLHUP` are translated into
//! read-and-write readiness.

use std::io;
use std::os::unix::io::RawFd;

use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};

use crate::config::Config;
use crate::error::Result;
use crate::poll::{Fired, Interest, MaskTable, Poll};

pub struct EpollPoll {
    epfd: RawFd,
    events: Vec<epoll_event>,
    fired: Vec<Fired>,
    masks: MaskTable,
}

fn interest_flags(interest: Interest) -> u32 {
    let mut flags = 0;
    if interest.read {
        flags |= EPOLLIN as u32;
    }
    if interest.write {
        flags |= EPOLLOUT as u32;
    }
    flags
}

impl EpollPoll {
    pub fn new(config: &Config) -> Result<Self> {
        let epfd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self {
            epfd,
            events: Vec::with_capacity(config.wait_capacity),
            fired: Vec::with_capacity(config.wait_capacity),
            masks: MaskTable::new(config.max_peers),
        })
    }

    fn ctl(&self, op: i32, fd: RawFd, interest: Interest) -> Result<()> {
        let mut ev = epoll_event {
            events: interest_flags(interest),
            u64: fd as u64,
        };
        let ptr = if op == EPOLL_CTL_DEL {
            std::ptr::null_mut()
        } else {
            &mut ev as *mut epoll_event
        };
        if unsafe { epoll_ctl(self.epfd, op, fd, ptr) } < 0 {
            let err = io::Error::last_os_error();
            tracing::error!(fd, op, error = %err, "epoll_ctl failed");
            return Err(err.into());
        }
        Ok(())
    }
}

impl Poll for EpollPoll {
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.masks.check(fd)?;
        self.ctl(EPOLL_CTL_ADD, fd, interest)?;
        self.masks.set(fd, interest);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.masks.check(fd)?;
        self.ctl(EPOLL_CTL_MOD, fd, interest)?;
        self.masks.set(fd, interest);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> Result<()> {
        self.masks.check(fd)?;
        self.ctl(EPOLL_CTL_DEL, fd, Interest::NONE)?;
        self.masks.clear(fd);
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> Result<usize> {
        // SAFETY: the kernel writes up to capacity entries; the length
        // is clamped to the returned count right after.
        unsafe {
            self.events.set_len(0);
        }
        let n = unsafe {
            epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
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
        for ev in &self.events {
            let failed = ev.events & (EPOLLERR | EPOLLHUP) as u32 != 0;
            let interest = Interest {
                read: failed || ev.events & EPOLLIN as u32 != 0,
                write: failed || ev.events & EPOLLOUT as u32 != 0,
            };
            self.fired.push(Fired {
                fd: ev.u64 as RawFd,
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

impl Drop for EpollPoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
