//! Monotonic time source used for every due-time comparison.
//!
//! Due-times are plain `u64` milliseconds on the clock's own timeline ("uptime"). The queue only
//! ever compares them with values produced by the same clock, so the epoch is irrelevant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic milliseconds.
pub trait Clock: Send + Sync {
    /// Current uptime in milliseconds. Must never go backwards.
    fn now_millis(&self) -> u64;
}

/// Wall-independent clock backed by [`Instant`].
///
/// The timeline starts at 1 rather than 0 because a due-time of 0 means "front of queue".
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        let elapsed = self.origin.elapsed().as_millis();
        u64::try_from(elapsed).unwrap_or(u64::MAX - 1) + 1
    }
}

/// Hand-driven clock for deterministic tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start` milliseconds.
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move time forward by `by`. Returns the new reading.
    pub fn advance(&self, by: Duration) -> u64 {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst) + millis
    }

    /// Jump to an absolute reading. Readings lower than the current one are ignored so the
    /// clock stays monotonic.
    pub fn set(&self, millis: u64) {
        self.now.fetch_max(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
