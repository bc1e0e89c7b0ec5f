//! Monotonic microsecond clock.
//!
//! All deadlines and state timestamps in the crate are absolute
//! microsecond values taken from this clock. The origin is the first
//! call in the process, so values stay small and never go backwards.

use std::sync::OnceLock;
use std::time::Instant;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Current time in microseconds since the clock anchor.
pub fn now() -> u64 {
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_micros() as u64
}

/// Microseconds elapsed since `since` (a value previously returned by
/// [`now`]). Saturates at zero if `since` is in the future.
pub fn elapsed(since: u64) -> u64 {
    now().saturating_sub(since)
}
