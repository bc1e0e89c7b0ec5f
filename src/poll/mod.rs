//! Readiness multiplexer backends.
//!
//! Three interchangeable strategies behind one trait:
//! - [`epoll::EpollPoll`]: persistent kernel event table (Linux),
//! - [`kqueue::KqueuePoll`]: kernel event queue (macOS/BSD),
//! - [`select::SelectPoll`]: portable descriptor-set scan, bounded by
//!   `FD_SETSIZE`.
//!
//! Exactly one backend is active per loop, chosen by [`create`] at
//! construction. All backends share the same contract: register or
//! update interest per descriptor, block in `wait`, and expose the
//! batch of ready `(fd, interest)` pairs from the most recent wait.
//! Backend error/hangup flags are reported as read *and* write
//! readiness so the dispatch handler gets a chance to observe the
//! failure and close the connection.

use std::os::unix::io::RawFd;

use crate::config::Config;
use crate::error::{Error, Result};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;

pub mod select;

/// Read/write interest mask for one descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };
    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };

    pub fn is_none(self) -> bool {
        !self.read && !self.write
    }
}

/// One ready descriptor from the most recent `wait`.
#[derive(Clone, Copy, Debug)]
pub struct Fired {
    pub fd: RawFd,
    pub interest: Interest,
}

/// The multiplexer contract.
pub trait Poll: Send {
    /// Register interest for a new descriptor.
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<()>;

    /// Replace the registered interest of `fd` with `interest`.
    /// Backends that express interest incrementally diff against the
    /// mask stored at registration time.
    fn modify(&mut self, fd: RawFd, interest: Interest) -> Result<()>;

    /// Remove `fd` entirely.
    fn remove(&mut self, fd: RawFd) -> Result<()>;

    /// Block for at most `timeout_ms` (`-1` blocks indefinitely) and
    /// collect ready descriptors. Returns the ready count; `EINTR`
    /// yields zero.
    fn wait(&mut self, timeout_ms: i32) -> Result<usize>;

    /// Ready descriptors produced by the most recent [`wait`](Poll::wait).
    fn fired(&self) -> &[Fired];

    /// Currently registered interest of `fd`, [`Interest::NONE`] if
    /// absent or out of range.
    fn mask(&self, fd: RawFd) -> Interest;
}

/// Per-descriptor interest bookkeeping shared by the backends.
///
/// Bounded by the configured peer capacity; every registration call
/// checks the bound first and refuses out-of-range descriptors without
/// mutating anything.
pub(crate) struct MaskTable {
    masks: Vec<Interest>,
}

impl MaskTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            masks: vec![Interest::NONE; capacity],
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.masks.len()
    }

    pub(crate) fn check(&self, fd: RawFd) -> Result<()> {
        if fd < 0 || fd as usize >= self.masks.len() {
            tracing::error!(fd, max = self.masks.len(), "fd out of registration range");
            return Err(Error::RegistrationOutOfRange {
                fd,
                max: self.masks.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn get(&self, fd: RawFd) -> Interest {
        if fd < 0 || fd as usize >= self.masks.len() {
            return Interest::NONE;
        }
        self.masks[fd as usize]
    }

    pub(crate) fn set(&mut self, fd: RawFd, interest: Interest) {
        self.masks[fd as usize] = interest;
    }

    pub(crate) fn clear(&mut self, fd: RawFd) {
        self.masks[fd as usize] = Interest::NONE;
    }
}

/// Build the one backend for this platform: the persistent-table
/// backend where available, the kernel event queue next, the portable
/// scan as universal fallback.
pub fn create(config: &Config) -> Result<Box<dyn Poll>> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        Ok(Box::new(epoll::EpollPoll::new(config)?))
    }
    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    {
        Ok(Box::new(kqueue::KqueuePoll::new(config)?))
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    )))]
    {
        Ok(Box::new(select::SelectPoll::new(config)?))
    }
}
