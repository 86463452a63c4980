// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wrap-around safe sequence numbers for system-message delivery
//!
//! Sequence numbers are signed 64-bit counters. Ordering is defined by the sign
//! of the wrapping difference, so `SeqNo(i64::MAX) < SeqNo(i64::MIN)`: the counter
//! wraps forward instead of jumping back to the smallest value.

use std::cmp::Ordering;
use std::fmt;

/// Sequence number of a reliably delivered (system) message.
///
/// # Ordering
///
/// `a < b` iff `b.wrapping_sub(a)` is positive. Equality is raw-value equality.
/// Ordering is only meaningful for values less than `2^63` apart, which is
/// always the case for the in-flight window of one association.
///
/// # Example
///
/// ```
/// use hdds_remoting::reliability::SeqNo;
///
/// let a = SeqNo::new(i64::MAX);
/// let b = a.increment();
/// assert_eq!(b.raw(), i64::MIN);
/// assert!(a < b);
/// assert!(b.is_successor_of(a));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNo(i64);

impl SeqNo {
    /// Value preceding the first assigned sequence number.
    ///
    /// Send buffers start with `max_seq = BEFORE_FIRST`, receive buffers with
    /// `last_delivered = BEFORE_FIRST`, so the first message carries `0`.
    pub const BEFORE_FIRST: SeqNo = SeqNo(-1);

    /// Wrap a raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw signed value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Next sequence number (wrapping add of 1).
    #[inline]
    #[must_use]
    pub const fn increment(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// True when `self` immediately follows `prev` (`self - prev == 1`).
    #[inline]
    #[must_use]
    pub const fn is_successor_of(self, prev: SeqNo) -> bool {
        self.0.wrapping_sub(prev.0) == 1
    }

    /// Larger of two sequence numbers under wrap-around ordering.
    #[inline]
    #[must_use]
    pub fn max_of(a: SeqNo, b: SeqNo) -> SeqNo {
        if a < b {
            b
        } else {
            a
        }
    }

    /// Sequence numbers strictly between `self` and `upper`, ascending.
    ///
    /// Empty when `upper` is not ahead of `self` by at least two.
    pub fn range_between(self, upper: SeqNo) -> impl Iterator<Item = SeqNo> {
        let span = upper.0.wrapping_sub(self.0);
        let count = if span > 1 { span - 1 } else { 0 };
        let start = self;
        (1..=count).map(move |offset| SeqNo(start.0.wrapping_add(offset)))
    }
}

impl Ord for SeqNo {
    fn cmp(&self, other: &Self) -> Ordering {
        let diff = self.0.wrapping_sub(other.0);
        diff.cmp(&0)
    }
}

impl PartialOrd for SeqNo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SeqNo {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}
