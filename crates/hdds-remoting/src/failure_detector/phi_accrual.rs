// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Phi accrual failure detector
//!
//! Instead of a binary up/down verdict, the detector outputs a suspicion level
//! `phi = -log10(1 - F(dt))`, where `F` is the CDF of a normal distribution
//! fitted to the observed heartbeat inter-arrival times and `dt` the time since
//! the last heartbeat. `phi = 1` means a 10% chance that the next heartbeat is
//! merely late, `phi = 2` 1%, and so on.
//!
//! # Thread Safety
//!
//! State is an immutable snapshot behind an [`ArcSwap`]. Heartbeats replace it
//! with a compare-and-swap retry loop (`rcu`), queries only load it. No locks.
//!
//! # References
//!
//! Hayashibara et al., "The phi Accrual Failure Detector" (2004).

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::{FailureDetector, HeartbeatHistory};
use crate::clock::{duration_ms, Clock};
use crate::config::PhiAccrualConfig;

#[derive(Debug, Clone)]
struct PhiState {
    history: HeartbeatHistory,
    last_heartbeat_ms: Option<u64>,
}

/// Phi accrual failure detector for one monitored peer.
///
/// # Example
///
/// ```
/// use hdds_remoting::clock::ManualClock;
/// use hdds_remoting::config::PhiAccrualConfig;
/// use hdds_remoting::failure_detector::{FailureDetector, PhiAccrualFailureDetector};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(ManualClock::new(0));
/// let fd = PhiAccrualFailureDetector::new(PhiAccrualConfig::default(), clock.clone());
/// for _ in 0..10 {
///     fd.heartbeat();
///     clock.advance(Duration::from_millis(1000));
/// }
/// assert!(fd.is_available());
/// clock.advance(Duration::from_secs(60));
/// assert!(!fd.is_available());
/// ```
#[derive(Debug)]
pub struct PhiAccrualFailureDetector {
    config: PhiAccrualConfig,
    acceptable_pause_ms: f64,
    min_std_deviation_ms: f64,
    clock: Arc<dyn Clock>,
    state: ArcSwap<PhiState>,
}

impl PhiAccrualFailureDetector {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(config: PhiAccrualConfig, clock: Arc<dyn Clock>) -> Self {
        let state = PhiState {
            history: HeartbeatHistory::new(config.max_sample_size),
            last_heartbeat_ms: None,
        };
        Self {
            acceptable_pause_ms: duration_ms(config.acceptable_heartbeat_pause) as f64,
            min_std_deviation_ms: duration_ms(config.min_std_deviation) as f64,
            config,
            clock,
            state: ArcSwap::from_pointee(state),
        }
    }

    /// Current suspicion level.
    #[must_use]
    pub fn phi(&self) -> f64 {
        self.phi_at(self.clock.now_ms())
    }

    /// Suspicion level at `now_ms`.
    #[must_use]
    pub fn phi_at(&self, now_ms: u64) -> f64 {
        let state = self.state.load();
        self.phi_at_state(&state, now_ms)
    }

    /// Configured suspicion threshold.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    /// Number of interval samples currently held.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.state.load().history.len()
    }

    fn is_available_at(&self, state: &PhiState, now_ms: u64) -> bool {
        match state.last_heartbeat_ms {
            None => true,
            Some(_) => self.phi_at_state(state, now_ms) < self.config.threshold,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn phi_at_state(&self, state: &PhiState, now_ms: u64) -> f64 {
        let Some(last) = state.last_heartbeat_ms else {
            return 0.0;
        };
        let time_diff = now_ms.saturating_sub(last) as f64;
        let std_deviation = state.history.std_deviation().max(self.min_std_deviation_ms);
        phi(
            time_diff,
            state.history.mean() + self.acceptable_pause_ms,
            std_deviation,
        )
    }

    fn bootstrap_history(&self) -> HeartbeatHistory {
        // Two synthetic samples around the estimate so a single heartbeat
        // already yields a non-degenerate distribution.
        let mean = duration_ms(self.config.first_heartbeat_estimate);
        let std_deviation = mean / 4;
        HeartbeatHistory::new(self.config.max_sample_size)
            .with_interval(mean - std_deviation)
            .with_interval(mean + std_deviation)
    }
}

impl FailureDetector for PhiAccrualFailureDetector {
    fn is_available(&self) -> bool {
        let state = self.state.load();
        self.is_available_at(&state, self.clock.now_ms())
    }

    fn is_monitoring(&self) -> bool {
        self.state.load().last_heartbeat_ms.is_some()
    }

    #[allow(clippy::cast_precision_loss)]
    fn heartbeat(&self) {
        let now_ms = self.clock.now_ms();
        self.state.rcu(|old| {
            let history = match old.last_heartbeat_ms {
                None => self.bootstrap_history(),
                Some(last) => {
                    let interval = now_ms.saturating_sub(last);
                    // Intervals spanning an unavailable period would skew the model
                    if self.is_available_at(old, now_ms) {
                        if interval as f64 >= self.acceptable_pause_ms * 2.0 / 3.0 {
                            log::warn!(
                                "[PhiAccrualFailureDetector::heartbeat] Heartbeat interval is growing too large: {} ms",
                                interval
                            );
                        }
                        old.history.with_interval(interval)
                    } else {
                        old.history.clone()
                    }
                }
            };
            Arc::new(PhiState {
                history,
                last_heartbeat_ms: Some(now_ms),
            })
        });
    }
}

/// Logistic approximation of the normal CDF tail, expressed as phi.
///
/// Error below 0.05% over the whole range; see Bowling et al. (2009).
#[must_use]
pub fn phi(time_diff: f64, mean: f64, std_deviation: f64) -> f64 {
    let y = (time_diff - mean) / std_deviation;
    let e = (-y * (1.5976 + 0.070566 * y * y)).exp();
    if time_diff > mean {
        -(e / (1.0 + e)).log10()
    } else {
        -(1.0 - 1.0 / (1.0 + e)).log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn detector(config: PhiAccrualConfig) -> (Arc<ManualClock>, PhiAccrualFailureDetector) {
        let clock = Arc::new(ManualClock::new(1_000));
        let fd = PhiAccrualFailureDetector::new(config, clock.clone());
        (clock, fd)
    }

    fn quick_config() -> PhiAccrualConfig {
        PhiAccrualConfig::default()
            .with_threshold(8.0)
            .with_acceptable_heartbeat_pause(Duration::ZERO)
            .with_min_std_deviation(Duration::from_millis(10))
    }

    #[test]
    fn test_phi_function_shape() {
        assert!(phi(0.0, 1000.0, 100.0) < 0.001);
        assert!((phi(1000.0, 1000.0, 100.0) - 0.3).abs() < 0.05);
        assert!(phi(1500.0, 1000.0, 100.0) > 5.0);
        assert!(phi(2000.0, 1000.0, 100.0) > phi(1500.0, 1000.0, 100.0));
    }

    #[test]
    fn test_unmonitored_is_available() {
        let (_, fd) = detector(quick_config());
        assert!(fd.is_available());
        assert!(!fd.is_monitoring());
        assert_eq!(fd.phi(), 0.0);
    }

    #[test]
    fn test_first_heartbeat_bootstraps_history() {
        let (_, fd) = detector(quick_config());
        fd.heartbeat();
        assert!(fd.is_monitoring());
        assert_eq!(fd.sample_count(), 2);
    }

    #[test]
    fn test_phi_near_zero_after_heartbeat_and_large_after_silence() {
        let (clock, fd) = detector(PhiAccrualConfig::default());
        for _ in 0..20 {
            fd.heartbeat();
            clock.advance(Duration::from_millis(1000));
        }
        fd.heartbeat();
        assert!(fd.phi() < 0.1, "phi right after heartbeat: {}", fd.phi());

        clock.advance(Duration::from_millis(1000 * 15));
        assert!(fd.phi() > fd.threshold(), "phi after silence: {}", fd.phi());
        assert!(!fd.is_available());
    }

    #[test]
    fn test_phi_grows_monotonically_with_silence() {
        let (clock, fd) = detector(quick_config());
        for _ in 0..10 {
            fd.heartbeat();
            clock.advance(Duration::from_millis(100));
        }
        let mut last = fd.phi();
        for _ in 0..5 {
            clock.advance(Duration::from_millis(50));
            let next = fd.phi();
            assert!(next >= last);
            last = next;
        }
    }

    #[test]
    fn test_sample_count_bounded() {
        let (clock, fd) = detector(quick_config().with_max_sample_size(5));
        for _ in 0..20 {
            fd.heartbeat();
            clock.advance(Duration::from_millis(100));
        }
        assert_eq!(fd.sample_count(), 5);
    }

    #[test]
    fn test_concurrent_heartbeats() {
        let clock = Arc::new(ManualClock::new(0));
        let fd = Arc::new(PhiAccrualFailureDetector::new(
            quick_config().with_max_sample_size(10_000),
            clock.clone(),
        ));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let fd = Arc::clone(&fd);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        fd.heartbeat();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("heartbeat thread");
        }
        // 2 bootstrap samples + one interval per later heartbeat
        assert_eq!(fd.sample_count(), 2 + 999);
    }
}
