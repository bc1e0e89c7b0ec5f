//! The state-transition handler.
//!
//! Given a connection unit and its current state, perform the one
//! legal I/O action and advance the state. Each entry point receives
//! the unit taken out of the registration table; it either puts the
//! unit back (would-block, next phase), re-arms it, or retires it
//! through [`close_peer`](EventLoop::close_peer).
//!
//! Nothing here retries: every terminal condition (error, timeout,
//! peer close) deregisters the unit and fires a callback or frees it.
//! The only implicit retry is would-block, which leaves the unit
//! registered for the next readiness notification.

use tracing::{debug, error, trace, warn};

use crate::conn::Conn;
use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::io::{ReadStatus, WriteStatus};
use crate::poll::Interest;
use crate::state::State;

/// Which timeout a deadline expiry maps to, judged by the state the
/// unit was in when the deadline fired.
pub(crate) fn timeout_kind(state: State) -> Error {
    match state {
        State::Connect => Error::ConnectTimeout,
        State::ToWrite | State::Writing | State::Writed => Error::WriteTimeout,
        _ => Error::ReadTimeout,
    }
}

impl EventLoop {
    /// Accept one pending peer on a listening unit.
    ///
    /// The accepted socket is configured (address reuse, no-delay,
    /// non-blocking) and admission-checked against the global
    /// connection limit before a unit is created. The new unit
    /// inherits the listener's channel and callbacks and starts in
    /// `Next`.
    pub(crate) fn on_listen(&mut self, listener: Box<Conn>) {
        debug_assert_eq!(listener.state(), State::Listen);

        let accepted = match listener.socket().accept() {
            Ok(socket) => socket,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                self.put_conn(listener);
                return;
            }
            Err(err) => {
                warn!(conn = %listener.describe(), error = %err, "accept failed");
                self.put_conn(listener);
                return;
            }
        };

        if let Err(err) = accepted
            .set_reuse_addr()
            .and_then(|_| accepted.set_tcp_no_delay())
            .and_then(|_| accepted.set_nonblocking())
        {
            warn!(fd = accepted.fd(), error = %err, "peer socket setup failed");
            self.put_conn(listener);
            return;
        }

        if self.connections() >= self.config().conn_limit {
            warn!(
                limit = self.config().conn_limit,
                error = %Error::CapacityExceeded,
                "drop accepted peer"
            );
            self.stats_mut().incr("conn.drop".to_owned());
            self.put_conn(listener);
            return;
        }

        let mut conn = Box::new(Conn::new(listener.channel().clone(), accepted));
        conn.copy_callbacks(&listener);
        conn.attach_counter(self.conn_counter());
        conn.set_state(State::Next);
        debug!(conn = %conn.describe(), "accepted");

        let fd = conn.fd();
        self.put_conn(listener);
        if fd < 0 || fd as usize >= self.config().max_peers {
            error!(fd, "accepted fd out of registration range");
            return;
        }
        self.put_conn(conn);
        self.dispatch(fd);
    }

    /// Resolve a pending non-blocking connect.
    pub(crate) fn on_connect(&mut self, mut conn: Box<Conn>) {
        debug_assert_eq!(conn.state(), State::Connect);

        if conn.is_connect_timeout() {
            conn.set_state(State::Timeout);
            conn.set_error(Error::ConnectTimeout);
            warn!(
                conn = %conn.describe(),
                budget_us = conn.timeout_option().connect_us,
                "connect timed out"
            );
            self.on_timeout(conn);
            return;
        }

        let pending = conn.socket().get_error();
        match pending {
            Ok(0) => {
                trace!(conn = %conn.describe(), "connect complete");
                conn.set_state(State::ToWrite);
                self.put_conn(conn);
            }
            Ok(errno) => {
                error!(conn = %conn.describe(), errno, "connect failed");
                conn.set_state(State::Error);
                conn.set_error(Error::ConnectError(errno));
                self.on_error(conn);
            }
            Err(err) => {
                error!(conn = %conn.describe(), error = %err, "connect status query failed");
                conn.set_state(State::Error);
                conn.set_error(Error::Io(err));
                self.on_error(conn);
            }
        }
    }

    /// Drive the protocol's read step on a readable unit.
    pub(crate) fn on_read(&mut self, mut conn: Box<Conn>) {
        conn.set_state(State::Reading);

        match conn.read_data() {
            ReadStatus::Complete => {
                trace!(conn = %conn.describe(), "read complete");
                conn.set_state(State::Readed);
                self.on_complete(conn);
            }
            ReadStatus::Error => {
                error!(conn = %conn.describe(), "read failed");
                conn.set_state(State::Error);
                conn.set_error(Error::ReadError);
                self.on_error(conn);
            }
            ReadStatus::WouldBlock => {
                if conn.is_read_timeout() {
                    conn.set_state(State::Timeout);
                    conn.set_error(Error::ReadTimeout);
                    warn!(
                        conn = %conn.describe(),
                        budget_us = conn.timeout_option().read_us,
                        "read timed out"
                    );
                    self.on_timeout(conn);
                } else {
                    trace!(conn = %conn.describe(), "read again");
                    self.put_conn(conn);
                }
            }
            ReadStatus::PeerClosed => {
                trace!(conn = %conn.describe(), "peer closed");
                conn.set_error(Error::PeerClosed);
                self.close_peer(conn);
            }
        }
    }

    /// Drive the protocol's write step on a writable unit.
    pub(crate) fn on_write(&mut self, mut conn: Box<Conn>) {
        conn.set_state(State::Writing);

        match conn.write_data() {
            WriteStatus::Complete => {
                trace!(conn = %conn.describe(), "write complete");
                conn.set_state(State::Writed);
                self.on_complete(conn);
            }
            WriteStatus::Error => {
                error!(conn = %conn.describe(), "write failed");
                conn.set_state(State::Error);
                conn.set_error(Error::WriteError);
                self.on_error(conn);
            }
            WriteStatus::WouldBlock => {
                if conn.is_write_timeout() {
                    conn.set_state(State::Timeout);
                    conn.set_error(Error::WriteTimeout);
                    warn!(
                        conn = %conn.describe(),
                        budget_us = conn.timeout_option().write_us,
                        "write timed out"
                    );
                    self.on_timeout(conn);
                } else {
                    trace!(conn = %conn.describe(), "write again");
                    self.put_conn(conn);
                }
            }
        }
    }

    /// Finish a completed read or write phase.
    ///
    /// `Readed`: the unit leaves the reactor and the completion
    /// callback fires (unless the unit is forwarded). `Writed`: the
    /// unit turns around: server units reset to `Next` for the next
    /// request on the same socket, client units move to `ToRead` to
    /// await the response.
    pub(crate) fn on_complete(&mut self, mut conn: Box<Conn>) {
        let fd = conn.fd();

        if conn.state() == State::Readed {
            if conn.is_read_timeout() {
                conn.set_state(State::Timeout);
                conn.set_error(Error::ReadTimeout);
                warn!(
                    conn = %conn.describe(),
                    budget_us = conn.timeout_option().read_us,
                    "request exceeded read budget"
                );
                self.on_timeout(conn);
                return;
            }

            self.remove_io(fd);

            if conn.socket().is_client() {
                let label = conn.label();
                let cost = conn.cost();
                self.stats_mut().incr(format!("conn.success-{label}"));
                self.stats_mut().add(format!("conn.cost-{label}"), cost);
            }
            if conn.is_forward() {
                trace!(conn = %conn.describe(), "forwarded, completion deferred");
                match conn.forward_callback() {
                    Some(cb) => cb(conn),
                    None => {
                        // Parked: deregistered but alive in the table,
                        // waiting for the responder to re-inject it.
                        warn!(conn = %conn.describe(), "forwarded unit without forward callback");
                        self.put_conn(conn);
                    }
                }
                return;
            }
            if let Some(cb) = conn.complete_callback() {
                cb(conn);
            }
            return;
        }

        if conn.state() == State::Writed {
            if conn.is_write_timeout() {
                conn.set_state(State::Timeout);
                conn.set_error(Error::WriteTimeout);
                warn!(
                    conn = %conn.describe(),
                    budget_us = conn.timeout_option().write_us,
                    "response exceeded write budget"
                );
                self.on_timeout(conn);
                return;
            }

            self.update_conn(fd, Interest::READ);

            if conn.socket().is_server() {
                let label = conn.label();
                let cost = conn.cost();
                self.stats_mut().incr(format!("conn.success-{label}"));
                self.stats_mut().add(format!("conn.cost-{label}"), cost);
                conn.reset();
                conn.set_state(State::Next);
            } else {
                conn.set_state(State::ToRead);
            }
            self.put_conn(conn);
            self.dispatch(fd);
        }
    }

    /// Record and tear down a timed-out unit.
    pub(crate) fn on_timeout(&mut self, conn: Box<Conn>) {
        debug_assert_eq!(conn.state(), State::Timeout);

        let label = conn.label();
        self.stats_mut().incr(format!("conn.timeout-{label}"));
        self.close_peer(conn);
    }

    /// Record and tear down a failed unit.
    pub(crate) fn on_error(&mut self, conn: Box<Conn>) {
        debug_assert_eq!(conn.state(), State::Error);

        let label = conn.label();
        self.stats_mut().incr(format!("conn.error-{label}"));
        self.close_peer(conn);
    }

    /// Deregister a unit from the multiplexer and the deadline heap,
    /// then settle ownership: client units are failed back to their
    /// owner through the close callback and are never dropped here;
    /// server units are dropped.
    pub(crate) fn close_peer(&mut self, mut conn: Box<Conn>) {
        self.remove_io(conn.fd());

        if conn.socket().is_client() {
            conn.set_state(State::Fail);
            match conn.close_callback() {
                Some(cb) => cb(conn),
                None => {
                    warn!(conn = %conn.describe(), "client unit without close callback");
                }
            }
        } else {
            debug!(conn = %conn.describe(), "peer closed and reclaimed");
        }
    }
}
