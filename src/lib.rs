//! # Rivet
//!
//! **Rivet** is a single-threaded, multiplexed I/O reactor: the event
//! loop underneath a small RPC/protocol framework.
//!
//! It owns three things:
//!
//! - a pluggable OS readiness multiplexer (`epoll`, `kqueue` or a
//!   portable `select` scan, one active backend per loop),
//! - a per-connection finite state machine describing the life of a
//!   socket from accept/connect through read/write/completion and
//!   teardown,
//! - a deadline-ordered lazy-deletion heap enforcing connect, read,
//!   write and long-poll limits without per-connection timers.
//!
//! Dispatch is strictly single-threaded. Other threads submit work
//! through a [`LoopHandle`]: two lock-free injection queues (connection
//! units and callbacks) plus a wake descriptor that knocks the reactor
//! out of its blocking wait. Everything the loop owns (the registration
//! table, the deadline heap, the multiplexer) is touched only on the
//! reactor thread and needs no locking.
//!
//! Wire formats, RPC correlation and request execution live outside
//! this crate, behind the [`io::Socket`], [`io::Transport`] and
//! [`io::Channel`] traits.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rivet::{Config, Conn, EventLoop, State};
//!
//! let mut el = EventLoop::new(Config::default())?;
//! let handle = el.handle();
//!
//! // `EchoChannel` and `ListenSocket` implement rivet::io traits.
//! let mut listener = Box::new(Conn::new(
//!     Arc::new(EchoChannel),
//!     Box::new(ListenSocket::bind("127.0.0.1:8080")?),
//! ));
//! listener.set_state(State::Listen);
//! handle.add_event(listener);
//!
//! el.run()?; // blocks until handle.stop()
//! ```

pub mod clock;
pub mod config;
pub mod conn;
pub mod error;
pub mod event_loop;
pub mod io;
pub mod poll;
pub mod state;
pub mod stats;
pub mod timed_heap;
pub mod wake;

mod handler;

pub use config::Config;
pub use conn::{Conn, TimeoutOption};
pub use error::{Error, Result};
pub use event_loop::{EventLoop, LoopHandle};
pub use state::State;

/// Commonly used types and traits.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::conn::{Conn, TimeoutOption};
    pub use crate::error::{Error, Result};
    pub use crate::event_loop::{EventLoop, LoopHandle};
    pub use crate::io::{Channel, ReadStatus, Socket, Transport, WriteStatus};
    pub use crate::state::State;
}
