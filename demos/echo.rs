//! A keep-alive TCP echo server on the reactor.
//!
//! Each accepted peer cycles through read, completion, write and back
//! to idle on a single thread. The completion callback turns a finished
//! read around by re-injecting the unit in `ToWrite`.
//!
//! Run with `cargo run --example echo`, then `nc 127.0.0.1 8642`.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use tracing::info;

use rivet::io::{Channel, ReadStatus, Socket, Transport, WriteStatus};
use rivet::{Config, Conn, EventLoop, State};

struct ListenSocket(TcpListener);

impl Socket for ListenSocket {
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
        let (stream, addr) = self.0.accept()?;
        info!(%addr, "peer connected");
        Ok(Box::new(PeerSocket(stream)))
    }
}

struct PeerSocket(TcpStream);

impl Socket for PeerSocket {
    fn fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    fn is_client(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("peer:{}", self.fd())
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        self.0.set_nonblocking(true)
    }

    fn set_tcp_no_delay(&self) -> io::Result<()> {
        self.0.set_nodelay(true)
    }
}

/// One request is whatever arrives in a single readable burst; the
/// write phase sends it back verbatim.
#[derive(Default)]
struct EchoTransport {
    buf: Vec<u8>,
    written: usize,
}

impl Transport for EchoTransport {
    fn read_data(&mut self, socket: &dyn Socket) -> ReadStatus {
        let mut chunk = [0u8; 4096];
        loop {
            let n = unsafe {
                libc::read(socket.fd(), chunk.as_mut_ptr() as *mut _, chunk.len())
            };
            if n > 0 {
                self.buf.extend_from_slice(&chunk[..n as usize]);
                continue;
            }
            if n == 0 {
                return ReadStatus::PeerClosed;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return ReadStatus::Error;
            }
            break;
        }
        if self.buf.is_empty() {
            ReadStatus::WouldBlock
        } else {
            ReadStatus::Complete
        }
    }

    fn write_data(&mut self, socket: &dyn Socket) -> WriteStatus {
        while self.written < self.buf.len() {
            let rest = &self.buf[self.written..];
            let n = unsafe { libc::write(socket.fd(), rest.as_ptr() as *const _, rest.len()) };
            if n > 0 {
                self.written += n as usize;
                continue;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return WriteStatus::WouldBlock;
            }
            return WriteStatus::Error;
        }
        WriteStatus::Complete
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.written = 0;
    }
}

struct EchoChannel;

impl Channel for EchoChannel {
    fn label(&self) -> &str {
        "echo"
    }

    fn make_transport(&self) -> Box<dyn Transport> {
        Box::new(EchoTransport::default())
    }
}

fn main() -> rivet::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let listener = TcpListener::bind("127.0.0.1:8642")?;
    listener.set_nonblocking(true)?;
    info!(addr = %listener.local_addr()?, "echo server listening");

    let mut el = EventLoop::new(Config::default())?;
    let handle = el.handle();

    let mut unit = Box::new(Conn::new(Arc::new(EchoChannel), Box::new(ListenSocket(listener))));
    unit.set_state(State::Listen);
    unit.set_complete_callback(move |mut conn| {
        conn.set_state(State::ToWrite);
        handle.add_event(conn);
    });
    el.add_event(unit);

    el.run()
}
