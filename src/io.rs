//! External collaborator interfaces.
//!
//! The reactor core does not create sockets, frame messages or decode
//! protocols. It consumes three capabilities implemented outside this
//! crate:
//! - a socket-like resource ([`Socket`]),
//! - a protocol data-mover ([`Transport`]),
//! - a channel that ties a listener to the transports and timeouts of
//!   the connections it accepts ([`Channel`]).

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::conn::TimeoutOption;

/// Outcome of one [`Transport::read_data`] step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// A complete message has been read.
    Complete,
    /// No more data available right now; stay registered and retry on
    /// the next readiness notification.
    WouldBlock,
    /// The peer closed the connection.
    PeerClosed,
    /// Hard I/O failure.
    Error,
}

/// Outcome of one [`Transport::write_data`] step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    /// The full message has been flushed.
    Complete,
    /// The kernel buffer is full; retry on the next writability.
    WouldBlock,
    /// Hard I/O failure.
    Error,
}

/// A socket-like resource driven by the reactor.
///
/// Setter defaults are no-ops so simple implementations only provide
/// the descriptor, the role and a description. `accept` defaults to
/// `Unsupported` for non-listening sockets.
pub trait Socket: Send {
    /// The underlying file descriptor.
    fn fd(&self) -> RawFd;

    /// Whether this socket originated from a local connect call.
    /// Client-owned units are never freed by the reactor.
    fn is_client(&self) -> bool;

    /// Whether this socket was accepted (or listens) on the server side.
    fn is_server(&self) -> bool {
        !self.is_client()
    }

    /// Human-readable identity for logs.
    fn describe(&self) -> String;

    /// Accept a pending peer. Only meaningful for listening sockets.
    fn accept(&self) -> io::Result<Box<dyn Socket>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "not a listening socket",
        ))
    }

    /// Pending socket error (`SO_ERROR`), queried after connect.
    fn get_error(&self) -> io::Result<i32> {
        Ok(0)
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        Ok(())
    }

    fn set_reuse_addr(&self) -> io::Result<()> {
        Ok(())
    }

    fn set_tcp_no_delay(&self) -> io::Result<()> {
        Ok(())
    }
}

/// A protocol data-mover.
///
/// The transport owns the framing buffers; the reactor only interprets
/// the returned status and never retries anything itself.
pub trait Transport: Send {
    /// Move readable bytes from the socket into the transport's input
    /// buffer, reporting framing progress.
    fn read_data(&mut self, socket: &dyn Socket) -> ReadStatus;

    /// Flush the transport's output buffer into the socket.
    fn write_data(&mut self, socket: &dyn Socket) -> WriteStatus;

    /// Clear per-request framing state before a keep-alive connection
    /// serves its next request.
    fn reset(&mut self) {}
}

/// Shared description of one service endpoint.
///
/// A listener's channel is inherited by every connection it accepts:
/// it names the connection for metrics, builds its transport, and
/// supplies its timeout budget.
pub trait Channel: Send + Sync {
    /// Metrics/label name for connections of this channel.
    fn label(&self) -> &str;

    /// Build a fresh transport for one connection.
    fn make_transport(&self) -> Box<dyn Transport>;

    /// Timeout budget applied to connections of this channel.
    fn timeout_option(&self) -> TimeoutOption {
        TimeoutOption::default()
    }
}

/// Convenience alias for the channels stored on connection units.
pub type SharedChannel = Arc<dyn Channel>;
