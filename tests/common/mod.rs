//! Shared mock collaborators for the integration tests: sockets over
//! real descriptors (so the multiplexer sees genuine readiness) and a
//! scriptable transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rivet::conn::{Conn, TimeoutOption};
use rivet::io::{Channel, ReadStatus, Socket, Transport, WriteStatus};

/// Channel whose transports replay scripted outcomes before falling
/// back to draining the descriptor.
pub struct TestChannel {
    pub label: String,
    pub timeouts: TimeoutOption,
    pub scripted_reads: Vec<ReadStatus>,
    pub scripted_writes: Vec<WriteStatus>,
}

impl TestChannel {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            timeouts: TimeoutOption::default(),
            scripted_reads: Vec::new(),
            scripted_writes: Vec::new(),
        }
    }
}

impl Channel for TestChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn make_transport(&self) -> Box<dyn Transport> {
        Box::new(TestTransport {
            reads: self.scripted_reads.iter().copied().collect(),
            writes: self.scripted_writes.iter().copied().collect(),
        })
    }

    fn timeout_option(&self) -> TimeoutOption {
        self.timeouts
    }
}

/// Drains available bytes from `fd` so level-triggered readiness goes
/// quiet, then reports what it saw.
enum Drained {
    Data,
    Eof,
    Empty,
}

fn drain(fd: RawFd) -> Drained {
    let mut buf = [0u8; 4096];
    let mut got = false;
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        if n > 0 {
            got = true;
            continue;
        }
        if n == 0 {
            return Drained::Eof;
        }
        break;
    }
    if got {
        Drained::Data
    } else {
        Drained::Empty
    }
}

pub struct TestTransport {
    reads: VecDeque<ReadStatus>,
    writes: VecDeque<WriteStatus>,
}

impl Transport for TestTransport {
    fn read_data(&mut self, socket: &dyn Socket) -> ReadStatus {
        let drained = drain(socket.fd());
        if let Some(status) = self.reads.pop_front() {
            return status;
        }
        match drained {
            Drained::Data => ReadStatus::Complete,
            Drained::Eof => ReadStatus::PeerClosed,
            Drained::Empty => ReadStatus::WouldBlock,
        }
    }

    fn write_data(&mut self, _socket: &dyn Socket) -> WriteStatus {
        self.writes.pop_front().unwrap_or(WriteStatus::Complete)
    }
}

/// Listening TCP socket; accepted peers become server-side
/// [`TcpSocket`]s.
pub struct ListenerSocket(pub TcpListener);

impl Socket for ListenerSocket {
    fn fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    fn is_client(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("listen:{}", self.fd())
    }

    fn accept(&self) -> io::Result<Box<dyn Socket>> {
        let (stream, _addr) = self.0.accept()?;
        Ok(Box::new(TcpSocket {
            stream,
            client: false,
        }))
    }
}

pub struct TcpSocket {
    pub stream: std::net::TcpStream,
    pub client: bool,
}

impl Socket for TcpSocket {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn is_client(&self) -> bool {
        self.client
    }

    fn describe(&self) -> String {
        format!("tcp:{}", self.fd())
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        self.stream.set_nonblocking(true)
    }
}

pub struct UnixSocket {
    pub stream: UnixStream,
    pub client: bool,
}

impl Socket for UnixSocket {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn is_client(&self) -> bool {
        self.client
    }

    fn describe(&self) -> String {
        format!("unix:{}", self.fd())
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        self.stream.set_nonblocking(true)
    }
}

/// Raw descriptor socket used where readiness must never fire (for
/// example a pipe read end registered for writability).
pub struct PipeSocket {
    pub fd: RawFd,
    pub client: bool,
}

impl Socket for PipeSocket {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn is_client(&self) -> bool {
        self.client
    }

    fn describe(&self) -> String {
        format!("pipe:{}", self.fd)
    }
}

impl Drop for PipeSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Owns the far end of a pipe so the kernel never reports hangup.
pub struct PipeEnd(pub RawFd);

impl Drop for PipeEnd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

pub fn pipe_pair() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe creation failed");
    for fd in fds {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
        }
    }
    (fds[0], fds[1])
}

/// Capture slot shared between a test and a completion/close callback.
#[derive(Clone, Default)]
pub struct Captured {
    pub count: Arc<AtomicUsize>,
    pub conn: Arc<Mutex<Option<Box<Conn>>>>,
}

impl Captured {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback that stores the unit and bumps the counter.
    pub fn callback(&self) -> impl Fn(Box<Conn>) + Send + Sync + 'static {
        let count = self.count.clone();
        let slot = self.conn.clone();
        move |conn| {
            count.fetch_add(1, Ordering::SeqCst);
            *slot.lock().unwrap() = Some(conn);
        }
    }

    pub fn fired(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn take(&self) -> Option<Box<Conn>> {
        self.conn.lock().unwrap().take()
    }
}
