//! Connection state tags.
//!
//! A connection unit is always in exactly one of these states. All
//! transitions are driven by the reactor loop and its state-transition
//! handler; nothing outside the loop mutates a registered unit.

use std::fmt;

/// The life of a socket inside the reactor, from accept/connect through
/// read/write/completion/teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Freshly constructed or reset, not yet driven.
    Init,
    /// Client socket waiting for a non-blocking connect to resolve.
    Connect,
    /// Listening socket waiting to accept peers.
    Listen,
    /// Waiting for the descriptor to become readable.
    ToRead,
    /// Mid-read; a previous read returned would-block.
    Reading,
    /// A complete request/response has been read.
    Readed,
    /// Waiting for the descriptor to become writable.
    ToWrite,
    /// Mid-write; a previous write returned would-block.
    Writing,
    /// A complete request/response has been written.
    Writed,
    /// Idle server connection awaiting its next request (keep-alive).
    Next,
    /// Terminal client-side failure; ownership returns to the caller.
    Fail,
    /// A connect/read/write deadline has elapsed.
    Timeout,
    /// An unrecoverable I/O or socket error occurred.
    Error,
    /// Unrecognized; treated as a protocol error on dispatch.
    Unknown,
}

static STATE_NAMES: [&str; 14] = [
    "Init", "Connect", "Listen", "ToRead", "Reading", "Readed", "ToWrite",
    "Writing", "Writed", "Next", "Fail", "Timeout", "Error", "Unknown",
];

impl State {
    /// Static name for logging and timestamp diagnostics.
    pub fn name(self) -> &'static str {
        STATE_NAMES[self as usize]
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
