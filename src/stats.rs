//! In-process loop and connection counters.
//!
//! Incremented only on the reactor thread; read through
//! [`EventLoop::stats`](crate::EventLoop::stats). Per-connection
//! counters are keyed by the channel label, mirroring the
//! `conn.success-* / conn.error-* / conn.timeout-*` naming of the
//! surrounding framework.

use std::collections::HashMap;

#[derive(Default)]
pub struct Stats {
    loops: u64,
    fired_total: u64,
    fired_max: u64,
    cost_total_us: u64,
    cost_max_us: u64,
    counters: HashMap<String, u64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_loop(&mut self, fired: u64, cost_us: u64) {
        self.loops += 1;
        self.fired_total += fired;
        self.fired_max = self.fired_max.max(fired);
        self.cost_total_us += cost_us;
        self.cost_max_us = self.cost_max_us.max(cost_us);
    }

    pub(crate) fn incr(&mut self, key: String) {
        *self.counters.entry(key).or_insert(0) += 1;
    }

    pub(crate) fn add(&mut self, key: String, v: u64) {
        *self.counters.entry(key).or_insert(0) += v;
    }

    /// Completed loop iterations.
    pub fn loops(&self) -> u64 {
        self.loops
    }

    /// Ready descriptors seen over all iterations, and the per
    /// iteration maximum.
    pub fn fired(&self) -> (u64, u64) {
        (self.fired_total, self.fired_max)
    }

    /// Average and maximum iteration wall-clock cost in microseconds.
    pub fn cost_us(&self) -> (u64, u64) {
        let avg = if self.loops == 0 {
            0
        } else {
            self.cost_total_us / self.loops
        };
        (avg, self.cost_max_us)
    }

    /// Value of a labelled counter, zero if never incremented.
    pub fn count(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }
}
