//! Cross-thread wake primitive.
//!
//! A descriptor any thread can signal to force the reactor thread out
//! of a blocking `wait`. On Linux it is an `eventfd`; elsewhere a
//! non-blocking pipe pair. The readable end is registered with the
//! multiplexer like any other descriptor; the loop recognizes it among
//! the fired descriptors and drains it instead of dispatching.

use std::io;
use std::os::unix::io::RawFd;

use crate::error::Result;

pub struct Waker {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Waker {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self {
            read_fd: fd,
            write_fd: fd,
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn new() -> Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error().into());
        }
        for fd in fds {
            unsafe {
                libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    /// The descriptor to register for read readiness.
    pub fn fd(&self) -> RawFd {
        self.read_fd
    }

    /// Signal the reactor thread. Callable from any thread; a short
    /// write on a non-blocking descriptor, failures (full pipe) are
    /// ignored since a pending signal already exists.
    pub fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.write_fd, &buf as *const u64 as *const _, 8);
        }
    }

    /// Drain all pending signals. Reactor thread only.
    pub fn consume(&self) {
        let mut buf = [0u8; 8];
        loop {
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut _, buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            if self.write_fd != self.read_fd {
                libc::close(self.write_fd);
            }
        }
    }
}
