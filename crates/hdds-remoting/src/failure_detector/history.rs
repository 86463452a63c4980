// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded heartbeat inter-arrival history.

use std::collections::VecDeque;

/// Ring of the most recent heartbeat intervals with running sums.
///
/// Oldest samples are evicted first once `max_sample_size` is reached.
/// The value is never mutated in place by the detector: every heartbeat
/// builds a new history for the next state snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatHistory {
    max_sample_size: usize,
    intervals: VecDeque<u64>,
    interval_sum: u64,
    squared_interval_sum: u64,
}

impl HeartbeatHistory {
    #[must_use]
    pub fn new(max_sample_size: usize) -> Self {
        Self {
            max_sample_size: max_sample_size.max(1),
            intervals: VecDeque::with_capacity(max_sample_size.max(1)),
            interval_sum: 0,
            squared_interval_sum: 0,
        }
    }

    /// History with `interval_ms` appended.
    #[must_use]
    pub fn with_interval(&self, interval_ms: u64) -> Self {
        let mut next = self.clone();
        if next.intervals.len() >= next.max_sample_size {
            if let Some(oldest) = next.intervals.pop_front() {
                next.interval_sum = next.interval_sum.saturating_sub(oldest);
                next.squared_interval_sum = next
                    .squared_interval_sum
                    .saturating_sub(oldest.saturating_mul(oldest));
            }
        }
        next.intervals.push_back(interval_ms);
        next.interval_sum = next.interval_sum.saturating_add(interval_ms);
        next.squared_interval_sum = next
            .squared_interval_sum
            .saturating_add(interval_ms.saturating_mul(interval_ms));
        next
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    #[must_use]
    pub fn max_sample_size(&self) -> usize {
        self.max_sample_size
    }

    /// Mean interval in milliseconds (0 when empty).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        if self.intervals.is_empty() {
            return 0.0;
        }
        self.interval_sum as f64 / self.intervals.len() as f64
    }

    /// Population variance in squared milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn variance(&self) -> f64 {
        if self.intervals.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        (self.squared_interval_sum as f64 / self.intervals.len() as f64 - mean * mean).max(0.0)
    }

    #[must_use]
    pub fn std_deviation(&self) -> f64 {
        self.variance().sqrt()
    }
}
