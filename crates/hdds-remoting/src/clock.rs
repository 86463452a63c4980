// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Injectable monotonic time source
//!
//! All deadlines in this crate are plain millisecond timestamps taken from a
//! [`Clock`]. Production code uses [`MonotonicClock`]; tests drive time by hand
//! with [`ManualClock`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic millisecond time source.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since an arbitrary, fixed origin.
    fn now_ms(&self) -> u64;

    /// Absolute deadline `after` from now.
    fn deadline_after(&self, after: Duration) -> u64 {
        self.now_ms().saturating_add(duration_ms(after))
    }

    /// True when `deadline` has been reached.
    fn is_overdue(&self, deadline: u64) -> bool {
        self.now_ms() >= deadline
    }
}

/// Duration in whole milliseconds, saturating at `u64::MAX`.
#[inline]
#[must_use]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Clock backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    #[must_use]
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
    fn now_ms(&self) -> u64 {
        duration_ms(self.origin.elapsed())
    }
}

/// Hand-driven clock for deterministic tests.
///
/// # Example
///
/// ```
/// use hdds_remoting::clock::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now_ms(), 1_250);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_ms(by), Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_deadlines() {
        let clock = ManualClock::new(100);
        let deadline = clock.deadline_after(Duration::from_millis(50));
        assert_eq!(deadline, 150);
        assert!(!clock.is_overdue(deadline));
        clock.advance(Duration::from_millis(50));
        assert!(clock.is_overdue(deadline));
    }

    #[test]
    fn test_deadline_saturates() {
        let clock = ManualClock::new(u64::MAX - 1);
        assert_eq!(clock.deadline_after(Duration::from_secs(10)), u64::MAX);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let first = clock.now_ms();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now_ms() >= first);
    }
}
