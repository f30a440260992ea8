//! Nanosecond clock handed to the packet path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic nanoseconds, counted from a base reading.
///
/// A fresh clock starts at zero. [`MonotonicClock::resume`] continues from a
/// reading saved by an earlier process so timestamps stored in meter records
/// stay comparable across invocations. Readings never fall behind a time
/// passed to [`MonotonicClock::advance_to`].
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
    base_ns: u64,
    floor_ns: AtomicU64,
}

impl MonotonicClock {
    /// Creates a clock reading zero now.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a clock reading `base_ns` now.
    pub fn starting_at(base_ns: u64) -> Self {
        Self {
            origin: Instant::now(),
            base_ns,
            floor_ns: AtomicU64::new(0),
        }
    }

    /// Continues from `saved_ns`, a reading taken at wall-clock time
    /// `saved_at_unix_ns`, adding the wall time that passed since.
    ///
    /// A wall clock that stepped backwards adds nothing.
    pub fn resume(saved_ns: u64, saved_at_unix_ns: u64) -> Self {
        let idle = unix_now_ns().saturating_sub(saved_at_unix_ns);
        Self::starting_at(saved_ns.saturating_add(idle))
    }

    /// Current reading in nanoseconds.
    pub fn now_ns(&self) -> u64 {
        self.base_ns
            .saturating_add(duration_ns(self.origin.elapsed()))
            .max(self.floor_ns.load(Ordering::Relaxed))
    }

    /// Makes every later reading at least `ns`. Used when a packet was
    /// stamped with an explicit time that may be ahead of the clock.
    pub fn advance_to(&self, ns: u64) {
        self.floor_ns.fetch_max(ns, Ordering::Relaxed);
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall-clock nanoseconds since the Unix epoch, zero if the clock is set
/// before it.
pub fn unix_now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_ns)
        .unwrap_or(0)
}

fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
