//! The per-descriptor connection state unit.
//!
//! A [`Conn`] carries one socket's state tag, a timestamped history of
//! its transitions, its timeout budget and its completion hooks. It is
//! the node type tracked by both the multiplexer registration table and
//! the deadline heap.
//!
//! Ownership is asymmetric. Server-accepted units are owned by the
//! reactor's registration table and dropped on teardown. Client units
//! are handed in by the caller through `add_event` and handed back out,
//! boxed, through the completion/close callbacks; the reactor never
//! drops them on a failure path.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use std::os::unix::io::RawFd;

use crate::clock;
use crate::error::Error;
use crate::io::{ReadStatus, SharedChannel, Socket, Transport, WriteStatus};
use crate::state::State;
use crate::timed_heap::Timeout;

static SEQID: AtomicU64 = AtomicU64::new(1);

/// Completion/close hook. Receives the unit by value: ownership leaves
/// the reactor when a hook fires.
pub type Callback = dyn Fn(Box<Conn>) + Send + Sync;

/// Connect/read/write timeout budget, immutable after construction.
///
/// Values are microseconds; the default is effectively "no timeout".
#[derive(Clone, Copy, Debug)]
pub struct TimeoutOption {
    pub connect_us: u64,
    pub read_us: u64,
    pub write_us: u64,
}

impl Default for TimeoutOption {
    fn default() -> Self {
        Self {
            connect_us: u64::MAX,
            read_us: u64::MAX,
            write_us: u64::MAX,
        }
    }
}

impl TimeoutOption {
    pub fn new(connect_us: u64, read_us: u64, write_us: u64) -> Self {
        Self {
            connect_us,
            read_us,
            write_us,
        }
    }
}

/// One recorded state transition: the entered state and the elapsed
/// time since the unit started (or last restarted).
#[derive(Clone, Copy, Debug)]
pub struct Stage {
    pub state: State,
    pub elapsed_us: u64,
}

/// Decrements the loop's live-connection counter when the unit drops,
/// wherever that happens (table teardown or inside a user callback).
pub(crate) struct ConnGuard(Arc<AtomicUsize>);

impl ConnGuard {
    pub(crate) fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A connection state unit.
pub struct Conn {
    seqid: u64,
    state: State,
    start: u64,
    timestamps: Vec<Stage>,
    timeout_opt: TimeoutOption,
    channel: SharedChannel,
    socket: Box<dyn Socket>,
    transport: Box<dyn Transport>,
    forward: bool,
    error: Option<Error>,
    complete_cb: Option<Arc<Callback>>,
    close_cb: Option<Arc<Callback>>,
    forward_cb: Option<Arc<Callback>>,
    counter: Option<ConnGuard>,
}

impl Conn {
    /// Build a unit over `socket`, taking the transport and timeout
    /// budget from `channel`. Starts in [`State::Init`].
    pub fn new(channel: SharedChannel, socket: Box<dyn Socket>) -> Self {
        let transport = channel.make_transport();
        let timeout_opt = channel.timeout_option();
        Self {
            seqid: SEQID.fetch_add(1, Ordering::Relaxed),
            state: State::Init,
            start: clock::now(),
            timestamps: vec![Stage {
                state: State::Init,
                elapsed_us: 0,
            }],
            timeout_opt,
            channel,
            socket,
            transport,
            forward: false,
            error: None,
            complete_cb: None,
            close_cb: None,
            forward_cb: None,
            counter: None,
        }
    }

    pub fn seqid(&self) -> u64 {
        self.seqid
    }

    pub fn fd(&self) -> RawFd {
        self.socket.fd()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Enter `state`, appending to the transition history. This is the
    /// single mutation path used by the loop and the handler; external
    /// code only seeds the initial `Listen`/`Connect`/`ToWrite` tag
    /// before registering the unit.
    pub fn set_state(&mut self, state: State) {
        self.state = state;
        self.timestamps.push(Stage {
            state,
            elapsed_us: clock::elapsed(self.start),
        });
    }

    /// Clear the transition history and re-enter [`State::Init`]; used
    /// when a keep-alive server connection turns around for its next
    /// request.
    pub fn restart(&mut self) {
        self.timestamps.clear();
        self.state = State::Init;
        self.start = clock::now();
        self.timestamps.push(Stage {
            state: State::Init,
            elapsed_us: 0,
        });
    }

    /// Reset framing state and history for the next request on the
    /// same socket.
    pub fn reset(&mut self) {
        self.transport.reset();
        self.restart();
    }

    /// Absolute start time (monotonic microseconds).
    pub fn start_time(&self) -> u64 {
        self.start
    }

    /// Microseconds since start/restart.
    pub fn cost(&self) -> u64 {
        clock::elapsed(self.start)
    }

    pub fn timeout_option(&self) -> &TimeoutOption {
        &self.timeout_opt
    }

    pub fn timestamps(&self) -> &[Stage] {
        &self.timestamps
    }

    /// `State:elapsed` pairs joined for diagnostics.
    pub fn timestamp_str(&self) -> String {
        let parts: Vec<String> = self
            .timestamps
            .iter()
            .map(|s| format!("{}:{}", s.state.name(), s.elapsed_us))
            .collect();
        parts.join("-")
    }

    // deadlines

    /// Repeating long-poll watchdog deadline for idle `Next` units.
    pub fn edeadline(&self, interval_us: u64) -> Timeout {
        Timeout::repeating(self.fd(), self.start.saturating_add(interval_us))
    }

    pub fn cdeadline(&self) -> Timeout {
        Timeout::new(self.fd(), self.start.saturating_add(self.timeout_opt.connect_us))
    }

    pub fn rdeadline(&self) -> Timeout {
        Timeout::new(self.fd(), self.start.saturating_add(self.timeout_opt.read_us))
    }

    pub fn wdeadline(&self) -> Timeout {
        Timeout::new(self.fd(), self.start.saturating_add(self.timeout_opt.write_us))
    }

    pub fn is_connect_timeout(&self) -> bool {
        self.cost() > self.timeout_opt.connect_us
    }

    pub fn is_read_timeout(&self) -> bool {
        self.cost() > self.timeout_opt.read_us
    }

    pub fn is_write_timeout(&self) -> bool {
        self.cost() > self.timeout_opt.write_us
    }

    // collaborators

    pub fn socket(&self) -> &dyn Socket {
        self.socket.as_ref()
    }

    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }

    /// Metrics name for this connection.
    pub fn label(&self) -> String {
        self.channel.label().to_owned()
    }

    pub fn describe(&self) -> String {
        format!(
            "conn({}, {}, {})",
            self.socket.describe(),
            self.state.name(),
            self.seqid
        )
    }

    pub fn read_data(&mut self) -> ReadStatus {
        self.transport.read_data(self.socket.as_ref())
    }

    pub fn write_data(&mut self) -> WriteStatus {
        self.transport.write_data(self.socket.as_ref())
    }

    // completion hooks

    /// Mark the unit as forwarded: the response will be produced
    /// asynchronously elsewhere. On read completion the unit is handed
    /// to the forward callback instead of the completion callback (or
    /// parked in the table if none is set); it is never freed.
    pub fn set_forward(&mut self) {
        self.forward = true;
    }

    pub fn is_forward(&self) -> bool {
        self.forward
    }

    /// Terminal error recorded by the handler, readable from within the
    /// close/complete callback.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    pub(crate) fn set_error(&mut self, error: Error) {
        self.error = Some(error);
    }

    pub fn set_complete_callback<F>(&mut self, cb: F)
    where
        F: Fn(Box<Conn>) + Send + Sync + 'static,
    {
        self.complete_cb = Some(Arc::new(cb));
    }

    pub fn set_close_callback<F>(&mut self, cb: F)
    where
        F: Fn(Box<Conn>) + Send + Sync + 'static,
    {
        self.close_cb = Some(Arc::new(cb));
    }

    /// Hook receiving forwarded units on read completion; the
    /// asynchronous responder takes custody and re-injects the unit
    /// once its response is ready.
    pub fn set_forward_callback<F>(&mut self, cb: F)
    where
        F: Fn(Box<Conn>) + Send + Sync + 'static,
    {
        self.forward_cb = Some(Arc::new(cb));
    }

    /// Inherit the hooks of `other`; accepted units copy them from
    /// their listener.
    pub fn copy_callbacks(&mut self, other: &Conn) {
        self.complete_cb = other.complete_cb.clone();
        self.close_cb = other.close_cb.clone();
        self.forward_cb = other.forward_cb.clone();
    }

    pub(crate) fn complete_callback(&self) -> Option<Arc<Callback>> {
        self.complete_cb.clone()
    }

    pub(crate) fn close_callback(&self) -> Option<Arc<Callback>> {
        self.close_cb.clone()
    }

    pub(crate) fn forward_callback(&self) -> Option<Arc<Callback>> {
        self.forward_cb.clone()
    }

    pub(crate) fn attach_counter(&mut self, counter: Arc<AtomicUsize>) {
        if self.counter.is_none() {
            self.counter = Some(ConnGuard::new(counter));
        }
    }
}
