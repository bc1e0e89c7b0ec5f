//! Reactor configuration.
//!
//! One explicit value struct, constructed once and threaded through the
//! loop, the multiplexer and the connection units. There is no
//! process-wide mutable configuration.

/// Configuration for an [`EventLoop`](crate::EventLoop) and its
/// multiplexer backend.
#[derive(Clone, Debug)]
pub struct Config {
    /// Registration capacity bound. Any descriptor `>= max_peers` is
    /// refused by the multiplexer without mutating state.
    pub max_peers: usize,

    /// Global connection admission limit, checked at accept time.
    pub conn_limit: usize,

    /// Maximum time one `wait` call may block, in milliseconds.
    /// `-1` blocks indefinitely.
    pub poll_timeout_ms: i32,

    /// Long-poll watchdog interval in microseconds. Idle connections
    /// sitting in `Next` carry a repeating deadline re-armed at this
    /// interval instead of being closed.
    pub longpoll_interval_us: u64,

    /// Maximum number of ready descriptors collected per `wait`.
    pub wait_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_peers: 10_000,
            conn_limit: 100_000,
            poll_timeout_ms: 1_000,
            longpoll_interval_us: 600_000_000,
            wait_capacity: 1_024,
        }
    }
}
