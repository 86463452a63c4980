// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Adaptive write backoff of a buffering writer.
//!
//! After each round that hit transport backpressure the writer compares how
//! much it managed to write with the best round seen so far:
//!
//! | Round | Effect |
//! |-------|--------|
//! | wrote at most one batch | full backoff next, adaptive delay x1.2 |
//! | wrote >= 60% of best | adaptive delay x0.9 |
//! | wrote <= 20% of best | adaptive delay x1.1 |
//!
//! The adaptive delay stays within `[min_adaptive_backoff, max_adaptive_backoff]`.

use std::time::Duration;

use crate::config::RemotingConfig;

/// Initial best-round write count.
const MAX_WRITE_COUNT: usize = 50;

/// Initial adaptive delay.
const INITIAL_ADAPTIVE_BACKOFF_NANOS: u64 = 1_000_000;

/// Delay before the next write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Little progress: wait the configured backoff interval.
    Full(Duration),
    /// Good progress: retry after the short adaptive delay.
    Short(Duration),
}

impl Backoff {
    #[must_use]
    pub fn delay(&self) -> Duration {
        match self {
            Self::Full(d) | Self::Short(d) => *d,
        }
    }
}

/// Write-rate driven backoff state.
#[derive(Debug, Clone)]
pub struct AdaptiveBackoff {
    batch_size: usize,
    backoff_interval: Duration,
    min_nanos: u64,
    max_nanos: u64,
    write_count: usize,
    max_write_count: usize,
    adaptive_nanos: u64,
    full_backoff: bool,
    full_backoff_count: u64,
    small_backoff_count: u64,
    no_backoff_count: u64,
}

impl AdaptiveBackoff {
    #[must_use]
    pub fn new(config: &RemotingConfig) -> Self {
        let min_nanos = duration_nanos(config.min_adaptive_backoff);
        let max_nanos = duration_nanos(config.max_adaptive_backoff);
        Self {
            batch_size: config.send_buffer_batch_size,
            backoff_interval: config.backoff_interval,
            min_nanos,
            max_nanos,
            write_count: 0,
            max_write_count: MAX_WRITE_COUNT,
            adaptive_nanos: INITIAL_ADAPTIVE_BACKOFF_NANOS.clamp(min_nanos, max_nanos.max(min_nanos)),
            full_backoff: false,
            full_backoff_count: 1,
            small_backoff_count: 0,
            no_backoff_count: 0,
        }
    }

    /// Frames to write per round.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn record_write(&mut self) {
        self.write_count += 1;
    }

    /// A full batch was written and more is pending: continue without delay.
    pub fn record_no_backoff(&mut self) {
        self.no_backoff_count += 1;
    }

    #[must_use]
    pub fn adaptive_backoff(&self) -> Duration {
        Duration::from_nanos(self.adaptive_nanos)
    }

    /// Close a round that stopped on backpressure and pick the next delay.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn next_backoff(&mut self) -> Backoff {
        self.max_write_count = self.max_write_count.max(self.write_count);
        let scaled = |nanos: u64, factor: f64| (nanos as f64 * factor) as u64;
        if self.write_count <= self.batch_size {
            self.full_backoff = true;
            self.adaptive_nanos = scaled(self.adaptive_nanos, 1.2).min(self.max_nanos);
        } else if self.write_count as f64 >= self.max_write_count as f64 * 0.6 {
            self.adaptive_nanos = scaled(self.adaptive_nanos, 0.9).max(self.min_nanos);
        } else if self.write_count as f64 <= self.max_write_count as f64 * 0.2 {
            self.adaptive_nanos = scaled(self.adaptive_nanos, 1.1).min(self.max_nanos);
        }
        self.write_count = 0;

        if self.full_backoff {
            self.full_backoff = false;
            self.full_backoff_count += 1;
            Backoff::Full(self.backoff_interval)
        } else {
            self.small_backoff_count += 1;
            Backoff::Short(self.adaptive_backoff())
        }
    }

    /// Buffer drained: log the round statistics and start over.
    pub fn reset(&mut self) {
        log::debug!(
            "[AdaptiveBackoff::reset] Drained buffer with max_write_count: {}, full_backoff_count: {}, small_backoff_count: {}, no_backoff_count: {}, adaptive_backoff: {} us",
            self.max_write_count,
            self.full_backoff_count,
            self.small_backoff_count,
            self.no_backoff_count,
            self.adaptive_nanos / 1_000
        );
        self.full_backoff_count = 1;
        self.small_backoff_count = 0;
        self.no_backoff_count = 0;
        self.write_count = 0;
        self.max_write_count = MAX_WRITE_COUNT;
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
