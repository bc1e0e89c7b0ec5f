//! Error taxonomy of the reactor core.
//!
//! Handler-internal conditions (timeouts, I/O failures, peer close) are
//! handled locally: the unit is moved to a terminal state, a metric is
//! recorded, and the error is surfaced to the application only through
//! the unit's completion/close callbacks. Capacity and registration
//! range violations are refused synchronously at the call site. Nothing
//! in this crate aborts the process.

use std::io;
use std::os::unix::io::RawFd;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The connect deadline elapsed before the socket became writable.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The read deadline elapsed before a complete request arrived.
    #[error("read timed out")]
    ReadTimeout,

    /// The write deadline elapsed before the response was flushed.
    #[error("write timed out")]
    WriteTimeout,

    /// The socket reported a pending error after connect (`SO_ERROR`).
    #[error("connect failed with socket error {0}")]
    ConnectError(i32),

    /// The transport reported a hard read failure.
    #[error("read failed")]
    ReadError,

    /// The transport reported a hard write failure.
    #[error("write failed")]
    WriteError,

    /// The peer closed the connection (graceful EOF).
    #[error("peer closed connection")]
    PeerClosed,

    /// The global connection limit is reached; the accepted socket was
    /// dropped and no unit was created.
    #[error("connection capacity exceeded")]
    CapacityExceeded,

    /// A multiplexer registration named a descriptor beyond the
    /// configured peer bound; nothing was mutated.
    #[error("fd {fd} out of registration range (max {max})")]
    RegistrationOutOfRange { fd: RawFd, max: usize },

    /// An underlying syscall failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
