//! Portable descriptor-set scan backend (`select`).
//!
//! The universal fallback. Interest lives in a persistent pair of
//! `fd_set` bitmaps which are copied for every `wait` call; the fired
//! scan walks the descriptor range and filters results through the
//! registered masks. The fixed-size bitmap cannot represent
//! descriptors at or beyond `FD_SETSIZE`, so construction fails fast
//! when the configured capacity exceeds that ceiling.
//!
//! `select` has no error/hangup flags; a failed peer surfaces as
//! readability with a zero-length read further up the stack.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::poll::{Fired, Interest, MaskTable, Poll};

pub struct SelectPoll {
    rfds: libc::fd_set,
    wfds: libc::fd_set,
    fired: Vec<Fired>,
    masks: MaskTable,
}

impl SelectPoll {
    pub fn new(config: &Config) -> Result<Self> {
        if config.max_peers > libc::FD_SETSIZE as usize {
            tracing::error!(
                max_peers = config.max_peers,
                ceiling = libc::FD_SETSIZE as usize,
                "select backend cannot represent configured peer count"
            );
            return Err(Error::CapacityExceeded);
        }
        let mut rfds = unsafe { mem::zeroed::<libc::fd_set>() };
        let mut wfds = unsafe { mem::zeroed::<libc::fd_set>() };
        unsafe {
            libc::FD_ZERO(&mut rfds);
            libc::FD_ZERO(&mut wfds);
        }
        Ok(Self {
            rfds,
            wfds,
            fired: Vec::with_capacity(config.wait_capacity),
            masks: MaskTable::new(config.max_peers),
        })
    }

    fn set_bits(&mut self, fd: RawFd, interest: Interest) {
        unsafe {
            if interest.read {
                libc::FD_SET(fd, &mut self.rfds);
            } else {
                libc::FD_CLR(fd, &mut self.rfds);
            }
            if interest.write {
                libc::FD_SET(fd, &mut self.wfds);
            } else {
                libc::FD_CLR(fd, &mut self.wfds);
            }
        }
    }
}

impl Poll for SelectPoll {
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.masks.check(fd)?;
        self.set_bits(fd, interest);
        self.masks.set(fd, interest);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.masks.check(fd)?;
        // Only touch the bitmaps where the stored mask disagrees.
        let prev = self.masks.get(fd);
        if prev != interest {
            self.set_bits(fd, interest);
        }
        self.masks.set(fd, interest);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> Result<()> {
        self.masks.check(fd)?;
        self.set_bits(fd, Interest::NONE);
        self.masks.clear(fd);
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> Result<usize> {
        let mut rfds = self.rfds;
        let mut wfds = self.wfds;
        let nfds = self.masks.capacity() as i32;

        let mut tv;
        let tv_ptr = if timeout_ms >= 0 {
            tv = libc::timeval {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_usec: (timeout_ms % 1000) as libc::suseconds_t * 1_000,
            };
            &mut tv as *mut libc::timeval
        } else {
            ptr::null_mut()
        };

        let r = unsafe { libc::select(nfds, &mut rfds, &mut wfds, ptr::null_mut(), tv_ptr) };
        if r < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                self.fired.clear();
                return Ok(0);
            }
            return Err(err.into());
        }

        self.fired.clear();
        if r > 0 {
            for fd in 0..nfds {
                let mask = self.masks.get(fd);
                if mask.is_none() {
                    continue;
                }
                let interest = Interest {
                    read: mask.read && unsafe { libc::FD_ISSET(fd, &rfds) },
                    write: mask.write && unsafe { libc::FD_ISSET(fd, &wfds) },
                };
                if !interest.is_none() {
                    self.fired.push(Fired { fd, interest });
                }
            }
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
