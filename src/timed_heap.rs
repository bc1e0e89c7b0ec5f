//! Lazy-deletion deadline heap.
//!
//! Connections register and re-register deadlines far more often than
//! the heap needs compacting, so entries are never removed from the
//! heap eagerly. A side map keyed by descriptor is the source of truth:
//! `erase` drops the map entry in O(1) and any heap copies become
//! stale, discarded the next time they surface at the top during `pop`.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::os::unix::io::RawFd;

/// One scheduled deadline for a registered connection.
///
/// Ordered and compared by `deadline` alone; the descriptor identifies
/// the owning connection unit in the registration table.
#[derive(Clone, Copy, Debug)]
pub struct Timeout {
    /// Descriptor of the owning connection unit.
    pub fd: RawFd,
    /// Absolute expiry time in monotonic microseconds.
    pub deadline: u64,
    /// Re-arm instead of firing: the long-poll watchdog for idle
    /// connections sitting in `Next`.
    pub repeat: bool,
}

impl Timeout {
    pub fn new(fd: RawFd, deadline: u64) -> Self {
        Self {
            fd,
            deadline,
            repeat: false,
        }
    }

    pub fn repeating(fd: RawFd, deadline: u64) -> Self {
        Self {
            fd,
            deadline,
            repeat: true,
        }
    }
}

impl PartialEq for Timeout {
    /// Equality is deadline equality, not identity.
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for Timeout {}

impl PartialOrd for Timeout {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timeout {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

/// Deadline-ordered priority queue with O(1) erase via lazy deletion.
#[derive(Default)]
pub struct TimedHeap {
    /// Most recently pushed live entry per descriptor.
    map: HashMap<RawFd, Timeout>,
    /// Min-heap by deadline; may contain stale duplicates.
    heap: BinaryHeap<Reverse<Timeout>>,
}

impl TimedHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or supersede the deadline for `t.fd`.
    ///
    /// The map slot is overwritten unconditionally; an older heap copy
    /// for the same descriptor becomes stale.
    pub fn push(&mut self, t: Timeout) {
        if t.fd < 0 {
            return;
        }
        self.map.insert(t.fd, t);
        self.heap.push(Reverse(t));
    }

    /// Pop the next due entry, discarding stale heap tops.
    ///
    /// Returns `None` when the earliest live deadline lies beyond
    /// `now`, never an entry that was erased or superseded.
    pub fn pop(&mut self, now: u64) -> Option<Timeout> {
        while let Some(Reverse(top)) = self.heap.peek().copied() {
            match self.map.get(&top.fd) {
                Some(live) if *live == top => {
                    if top.deadline <= now {
                        self.map.remove(&top.fd);
                        self.heap.pop();
                        return Some(top);
                    }
                    return None;
                }
                _ => {
                    // stale duplicate
                    self.heap.pop();
                }
            }
        }
        None
    }

    /// Invalidate the live entry for `fd`, if any. Idempotent; heap
    /// copies are reclaimed lazily by later pops.
    pub fn erase(&mut self, fd: RawFd) {
        self.map.remove(&fd);
    }

    /// Number of live (non-erased) deadlines.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Total heap entries including stale duplicates, for diagnostics.
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }
}
