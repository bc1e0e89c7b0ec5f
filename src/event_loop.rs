//! The reactor loop.
//!
//! A single thread owns the multiplexer, the fd-indexed registration
//! table and the deadline heap. Every iteration, in strict order:
//! 1. drain externally-injected connection units (register + arm),
//! 2. drain externally-injected callbacks,
//! 3. expire due deadlines,
//! 4. block on the multiplexer,
//! 5. dispatch each ready descriptor by its unit's current state.
//!
//! Other threads interact only through a [`LoopHandle`]: two lock-free
//! injection queues plus a wake descriptor. Everything else is
//! reactor-thread-only and needs no locking.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use std::os::unix::io::RawFd;

use crossbeam_queue::SegQueue;
use tracing::{debug, error, info, trace, warn};

use crate::clock;
use crate::config::Config;
use crate::conn::Conn;
use crate::error::Result;
use crate::poll::{self, Fired, Interest, Poll};
use crate::state::State;
use crate::stats::Stats;
use crate::timed_heap::TimedHeap;
use crate::wake::Waker;

type InjectedCallback = Box<dyn FnOnce() + Send>;

/// Cross-thread submission half of the loop.
///
/// Cloneable and cheap; pushing wakes the reactor out of its blocking
/// wait, so a submission is observed by the next iteration boundary.
#[derive(Clone)]
pub struct LoopHandle {
    events: Arc<SegQueue<Box<Conn>>>,
    callbacks: Arc<SegQueue<InjectedCallback>>,
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl LoopHandle {
    /// Hand a connection unit to the reactor. The unit's current state
    /// (`Listen`, `Connect`, `ToWrite`, ...) decides how it is armed.
    pub fn add_event(&self, conn: Box<Conn>) {
        self.events.push(conn);
        self.waker.wake();
    }

    /// Queue a callback to run inline on the reactor thread.
    pub fn add_callback<F>(&self, cb: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.callbacks.push(Box::new(cb));
        self.waker.wake();
    }

    /// Request a cooperative stop, observed at the top of the next
    /// iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.waker.wake();
    }
}

/// The single-threaded reactor.
pub struct EventLoop {
    config: Config,
    poll: Box<dyn Poll>,
    /// fd-indexed registration table; owning slots for server units,
    /// temporary custody for client units.
    table: Vec<Option<Box<Conn>>>,
    deadlines: TimedHeap,
    listen_fds: Vec<RawFd>,
    waker: Arc<Waker>,
    events: Arc<SegQueue<Box<Conn>>>,
    callbacks: Arc<SegQueue<InjectedCallback>>,
    stop: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
    stats: Stats,
}

impl EventLoop {
    pub fn new(config: Config) -> Result<Self> {
        let mut poll = poll::create(&config)?;
        let waker = Arc::new(Waker::new()?);
        poll.add(waker.fd(), Interest::READ)?;

        let table = (0..config.max_peers).map(|_| None).collect();

        Ok(Self {
            config,
            poll,
            table,
            deadlines: TimedHeap::new(),
            listen_fds: Vec::new(),
            waker,
            events: Arc::new(SegQueue::new()),
            callbacks: Arc::new(SegQueue::new()),
            stop: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(AtomicUsize::new(0)),
            stats: Stats::new(),
        })
    }

    /// Submission handle usable from any thread.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            events: self.events.clone(),
            callbacks: self.callbacks.clone(),
            stop: self.stop.clone(),
            waker: self.waker.clone(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Live connection units currently known to the loop.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Live (non-erased) deadline entries.
    pub fn deadlines(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether a unit is registered for `fd`.
    pub fn contains(&self, fd: RawFd) -> bool {
        self.slot(fd).map(|s| s.is_some()).unwrap_or(false)
    }

    /// Current state of the unit registered for `fd`.
    pub fn state_of(&self, fd: RawFd) -> Option<State> {
        self.slot(fd).and_then(|s| s.as_ref().map(|c| c.state()))
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Same-thread convenience for [`LoopHandle::add_event`].
    pub fn add_event(&self, conn: Box<Conn>) {
        self.events.push(conn);
        self.waker.wake();
    }

    /// Same-thread convenience for [`LoopHandle::add_callback`].
    pub fn add_callback<F>(&self, cb: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.callbacks.push(Box::new(cb));
        self.waker.wake();
    }

    /// Same-thread convenience for [`LoopHandle::stop`].
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.waker.wake();
    }

    /// Run until [`LoopHandle::stop`] is observed, then deregister the
    /// wake descriptor and all listeners.
    pub fn run(&mut self) -> Result<()> {
        info!("event loop starting");
        while !self.stop.load(Ordering::Acquire) {
            self.loop_body()?;
        }
        self.shutdown_fds();
        self.stop.store(false, Ordering::Release);
        info!("event loop stopped");
        Ok(())
    }

    /// Execute exactly one iteration, for embedding and tests.
    pub fn loop_once(&mut self) -> Result<()> {
        self.loop_body()
    }

    fn slot(&self, fd: RawFd) -> Option<&Option<Box<Conn>>> {
        if fd < 0 {
            return None;
        }
        self.table.get(fd as usize)
    }

    fn take_conn(&mut self, fd: RawFd) -> Option<Box<Conn>> {
        if fd < 0 || fd as usize >= self.table.len() {
            return None;
        }
        self.table[fd as usize].take()
    }

    /// Insert a unit into the registration table.
    pub(crate) fn put_conn(&mut self, conn: Box<Conn>) {
        let fd = conn.fd();
        debug_assert!(fd >= 0 && (fd as usize) < self.table.len());
        self.table[fd as usize] = Some(conn);
    }

    /// Drop the unit's deadline and multiplexer registration. The
    /// table slot is expected to be vacated by the caller.
    pub(crate) fn remove_io(&mut self, fd: RawFd) {
        self.deadlines.erase(fd);
        if !self.poll.mask(fd).is_none() {
            if let Err(err) = self.poll.remove(fd) {
                debug!(fd, error = %err, "deregistration failed");
            }
        }
    }

    /// Supersede the unit's deadline and switch its interest mask.
    pub(crate) fn update_conn(&mut self, fd: RawFd, interest: Interest) {
        self.deadlines.erase(fd);
        if let Err(err) = self.ensure_interest(fd, interest) {
            debug!(fd, error = %err, "interest update failed");
        }
    }

    /// Reset a keep-alive unit for its next request and arm the read
    /// deadline.
    pub(crate) fn restart_conn(&mut self, conn: &mut Conn) {
        self.deadlines.erase(conn.fd());
        conn.restart();
        self.deadlines.push(conn.rdeadline());
    }

    fn ensure_interest(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        let current = self.poll.mask(fd);
        if current.is_none() {
            self.poll.add(fd, interest)
        } else if current != interest {
            self.poll.modify(fd, interest)
        } else {
            Ok(())
        }
    }

    /// Arm the registered unit for `fd` according to its current
    /// state: push the matching deadline and set multiplexer interest.
    pub(crate) fn dispatch(&mut self, fd: RawFd) {
        let Some(Some(conn)) = self.slot(fd) else {
            return;
        };
        let state = conn.state();
        let timeout = match state {
            State::Listen => None,
            State::Next => Some(conn.edeadline(self.config.longpoll_interval_us)),
            State::ToRead => Some(conn.rdeadline()),
            State::Connect => Some(conn.cdeadline()),
            State::ToWrite => Some(conn.wdeadline()),
            other => {
                error!(fd, state = %other, "cannot arm event in this state");
                return;
            }
        };

        if let Some(t) = timeout {
            trace!(fd, deadline = t.deadline, repeat = t.repeat, "arm deadline");
            self.deadlines.push(t);
        }

        let interest = match state {
            State::Listen => {
                self.listen_fds.push(fd);
                Interest::READ
            }
            State::Next | State::ToRead => Interest::READ,
            State::Connect | State::ToWrite => Interest::WRITE,
            _ => unreachable!(),
        };
        if let Err(err) = self.ensure_interest(fd, interest) {
            error!(fd, error = %err, "multiplexer registration failed");
        }
    }

    fn loop_body(&mut self) -> Result<()> {
        let t0 = clock::now();

        // 1. injected connection units
        while let Some(mut conn) = self.events.pop() {
            let fd = conn.fd();
            if fd < 0 || fd as usize >= self.table.len() {
                error!(fd, conn = %conn.describe(), "injected fd out of range");
                self.fail_injected(conn);
                continue;
            }
            trace!(conn = %conn.describe(), "add event");
            conn.attach_counter(self.connections.clone());
            self.put_conn(conn);
            self.dispatch(fd);
        }

        // 2. injected callbacks
        while let Some(cb) = self.callbacks.pop() {
            cb();
        }

        // 3. due deadlines
        self.check_timeouts();

        // 4. readiness
        let n = self.poll.wait(self.config.poll_timeout_ms)?;

        // 5. dispatch ready descriptors
        if n > 0 {
            let fired: Vec<Fired> = self.poll.fired().to_vec();
            for f in fired {
                if f.fd == self.waker.fd() {
                    self.waker.consume();
                    continue;
                }
                self.dispatch_ready(f);
            }
        }

        self.stats.record_loop(n as u64, clock::elapsed(t0));
        Ok(())
    }

    fn dispatch_ready(&mut self, fired: Fired) {
        let Some(mut conn) = self.take_conn(fired.fd) else {
            return;
        };
        trace!(conn = %conn.describe(), interest = ?fired.interest, "on event");
        match conn.state() {
            State::Listen => self.on_listen(conn),
            State::Connect => self.on_connect(conn),
            State::Next => {
                self.restart_conn(&mut conn);
                self.on_read(conn);
            }
            State::ToRead | State::Reading => self.on_read(conn),
            State::ToWrite | State::Writing => self.on_write(conn),
            State::Timeout => self.on_timeout(conn),
            other => {
                error!(fd = fired.fd, state = %other, "event in unexpected state");
                self.close_peer(conn);
            }
        }
    }

    /// Expire due deadlines. Repeating (long-poll watchdog) entries are
    /// re-armed while capacity remains; everything else transitions the
    /// owning unit to `Timeout`.
    fn check_timeouts(&mut self) {
        let now = clock::now();
        loop {
            let Some(mut t) = self.deadlines.pop(now) else {
                break;
            };
            if t.repeat && self.connections() < self.config.conn_limit {
                t.deadline += self.config.longpoll_interval_us;
                self.deadlines.push(t);
                continue;
            }
            let Some(mut conn) = self.take_conn(t.fd) else {
                continue;
            };
            let kind = crate::handler::timeout_kind(conn.state());
            conn.set_state(State::Timeout);
            conn.set_error(kind);
            warn!(
                conn = %conn.describe(),
                over_us = now.saturating_sub(t.deadline),
                "deadline expired"
            );
            self.on_timeout(conn);
        }
    }

    /// An injected unit that cannot be registered: client units are
    /// failed back to their owner, server units are dropped.
    fn fail_injected(&mut self, mut conn: Box<Conn>) {
        if conn.socket().is_client() {
            conn.set_state(State::Fail);
            if let Some(cb) = conn.close_callback() {
                cb(conn);
            }
        }
    }

    pub(crate) fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    pub(crate) fn conn_counter(&self) -> Arc<AtomicUsize> {
        self.connections.clone()
    }

    fn shutdown_fds(&mut self) {
        if !self.poll.mask(self.waker.fd()).is_none() {
            let _ = self.poll.remove(self.waker.fd());
        }
        let listeners: Vec<RawFd> = self.listen_fds.drain(..).collect();
        for fd in listeners {
            if !self.poll.mask(fd).is_none() {
                let _ = self.poll.remove(fd);
            }
        }
    }
}
