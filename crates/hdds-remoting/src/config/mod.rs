// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remoting configuration
//!
//! Plain structs with defaults and `with_*` builders. Values can also be loaded
//! from YAML via [`loader::YamlConfigLoader`] (feature `config-loaders`).
//!
//! ```
//! use hdds_remoting::config::RemotingConfig;
//! use std::time::Duration;
//!
//! let config = RemotingConfig::default()
//!     .with_retry_gate_closed_for(Duration::from_secs(1))
//!     .with_system_message_buffer_size(1_000);
//! assert!(config.validate().is_ok());
//! ```

#[cfg(feature = "config-loaders")]
pub mod loader;

use std::time::Duration;

use crate::error::ConfigError;

/// Phi accrual failure detector settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PhiAccrualConfig {
    /// Suspicion level above which the peer is considered unavailable.
    pub threshold: f64,
    /// Number of inter-arrival samples kept.
    pub max_sample_size: usize,
    /// Floor of the standard deviation used in the normal distribution.
    pub min_std_deviation: Duration,
    /// Pause tolerated on top of the mean interval before suspicion grows.
    pub acceptable_heartbeat_pause: Duration,
    /// Interval assumed for the bootstrap samples after the first heartbeat.
    pub first_heartbeat_estimate: Duration,
}

impl Default for PhiAccrualConfig {
    fn default() -> Self {
        Self {
            threshold: 10.0,
            max_sample_size: 200,
            min_std_deviation: Duration::from_millis(100),
            acceptable_heartbeat_pause: Duration::from_secs(10),
            first_heartbeat_estimate: Duration::from_secs(1),
        }
    }
}

impl PhiAccrualConfig {
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_max_sample_size(mut self, max_sample_size: usize) -> Self {
        self.max_sample_size = max_sample_size;
        self
    }

    #[must_use]
    pub fn with_min_std_deviation(mut self, min_std_deviation: Duration) -> Self {
        self.min_std_deviation = min_std_deviation;
        self
    }

    #[must_use]
    pub fn with_acceptable_heartbeat_pause(mut self, pause: Duration) -> Self {
        self.acceptable_heartbeat_pause = pause;
        self
    }

    #[must_use]
    pub fn with_first_heartbeat_estimate(mut self, estimate: Duration) -> Self {
        self.first_heartbeat_estimate = estimate;
        self
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.threshold > 0.0) {
            return Err(invalid("threshold", "must be > 0"));
        }
        if self.max_sample_size == 0 {
            return Err(invalid("max_sample_size", "must be > 0"));
        }
        if self.min_std_deviation.is_zero() {
            return Err(invalid("min_std_deviation", "must be > 0"));
        }
        if self.first_heartbeat_estimate.is_zero() {
            return Err(invalid("first_heartbeat_estimate", "must be > 0"));
        }
        Ok(())
    }
}

/// Deadline failure detector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineConfig {
    /// Maximum silence after the last heartbeat still judged available.
    pub acceptable_heartbeat_pause: Duration,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            acceptable_heartbeat_pause: Duration::from_secs(10),
        }
    }
}

/// Endpoint layer settings.
///
/// | Field | Default |
/// |-------|---------|
/// | `system_message_buffer_size` | 20000 |
/// | `sys_msg_ack_timeout` | 300 ms |
/// | `sys_resend_interval` | 2 s |
/// | `sys_resend_limit` | 200 |
/// | `initial_sys_msg_delivery_timeout` | 180 s |
/// | `retry_gate_closed_for` | 5 s |
/// | `quarantine_duration` | 5 days |
/// | `quarantine_silent_system_timeout` | 2 days |
/// | `prune_interval` | 10 s |
/// | `backoff_interval` | 5 ms |
/// | `send_buffer_batch_size` | 5 |
/// | `min_adaptive_backoff` / `max_adaptive_backoff` | 300 us / 2 ms |
/// | `use_passive_connections` | true |
/// | `log_buffer_size_exceeding` | 50000 |
/// | `flush_wait` | 2 s |
#[derive(Debug, Clone, PartialEq)]
pub struct RemotingConfig {
    /// Capacity of the per-association system message send buffer.
    pub system_message_buffer_size: usize,
    /// Force a pure acknowledgment when no ack piggybacked for this long.
    pub sys_msg_ack_timeout: Duration,
    /// Period of unacknowledged system message redelivery.
    pub sys_resend_interval: Duration,
    /// Maximum unacknowledged system messages written per resend round.
    pub sys_resend_limit: usize,
    /// Bail-out deadline for system messages waiting on a gated association.
    pub initial_sys_msg_delivery_timeout: Duration,
    /// Gate cooldown after a failed association.
    pub retry_gate_closed_for: Duration,
    /// Lifetime of a quarantine tombstone.
    pub quarantine_duration: Duration,
    /// Idle association with unacknowledged system messages becomes hopeless after this.
    pub quarantine_silent_system_timeout: Duration,
    /// Period of the registry prune sweep.
    pub prune_interval: Duration,
    /// Full backoff period of a buffering writer.
    pub backoff_interval: Duration,
    /// Frames written per backoff round.
    pub send_buffer_batch_size: usize,
    /// Lower bound of the adaptive backoff.
    pub min_adaptive_backoff: Duration,
    /// Upper bound of the adaptive backoff.
    pub max_adaptive_backoff: Duration,
    /// Inbound associations become writable endpoints when no writer exists.
    pub use_passive_connections: bool,
    /// Warn when a writer buffers more frames than this.
    pub log_buffer_size_exceeding: usize,
    /// Time a buffering writer may keep draining after a flush request.
    pub flush_wait: Duration,
    /// Failure detector used by the node liveness monitor.
    pub watch_failure_detector: PhiAccrualConfig,
}

impl Default for RemotingConfig {
    fn default() -> Self {
        Self {
            system_message_buffer_size: 20_000,
            sys_msg_ack_timeout: Duration::from_millis(300),
            sys_resend_interval: Duration::from_secs(2),
            sys_resend_limit: 200,
            initial_sys_msg_delivery_timeout: Duration::from_secs(180),
            retry_gate_closed_for: Duration::from_secs(5),
            quarantine_duration: Duration::from_secs(5 * 24 * 3600),
            quarantine_silent_system_timeout: Duration::from_secs(2 * 24 * 3600),
            prune_interval: Duration::from_secs(10),
            backoff_interval: Duration::from_millis(5),
            send_buffer_batch_size: 5,
            min_adaptive_backoff: Duration::from_micros(300),
            max_adaptive_backoff: Duration::from_millis(2),
            use_passive_connections: true,
            log_buffer_size_exceeding: 50_000,
            flush_wait: Duration::from_secs(2),
            watch_failure_detector: PhiAccrualConfig::default(),
        }
    }
}

impl RemotingConfig {
    #[must_use]
    pub fn with_system_message_buffer_size(mut self, size: usize) -> Self {
        self.system_message_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_sys_msg_ack_timeout(mut self, timeout: Duration) -> Self {
        self.sys_msg_ack_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_sys_resend_interval(mut self, interval: Duration) -> Self {
        self.sys_resend_interval = interval;
        self
    }

    #[must_use]
    pub fn with_sys_resend_limit(mut self, limit: usize) -> Self {
        self.sys_resend_limit = limit;
        self
    }

    #[must_use]
    pub fn with_initial_sys_msg_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.initial_sys_msg_delivery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_gate_closed_for(mut self, gate: Duration) -> Self {
        self.retry_gate_closed_for = gate;
        self
    }

    #[must_use]
    pub fn with_quarantine_duration(mut self, duration: Duration) -> Self {
        self.quarantine_duration = duration;
        self
    }

    #[must_use]
    pub fn with_quarantine_silent_system_timeout(mut self, timeout: Duration) -> Self {
        self.quarantine_silent_system_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    #[must_use]
    pub fn with_backoff_interval(mut self, interval: Duration) -> Self {
        self.backoff_interval = interval;
        self
    }

    #[must_use]
    pub fn with_send_buffer_batch_size(mut self, size: usize) -> Self {
        self.send_buffer_batch_size = size;
        self
    }

    #[must_use]
    pub fn with_adaptive_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_adaptive_backoff = min;
        self.max_adaptive_backoff = max;
        self
    }

    #[must_use]
    pub fn with_passive_connections(mut self, enabled: bool) -> Self {
        self.use_passive_connections = enabled;
        self
    }

    #[must_use]
    pub fn with_flush_wait(mut self, wait: Duration) -> Self {
        self.flush_wait = wait;
        self
    }

    #[must_use]
    pub fn with_watch_failure_detector(mut self, detector: PhiAccrualConfig) -> Self {
        self.watch_failure_detector = detector;
        self
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system_message_buffer_size == 0 {
            return Err(invalid("system_message_buffer_size", "must be > 0"));
        }
        if self.send_buffer_batch_size == 0 {
            return Err(invalid("send_buffer_batch_size", "must be > 0"));
        }
        if self.sys_resend_limit == 0 {
            return Err(invalid("sys_resend_limit", "must be > 0"));
        }
        if self.sys_resend_interval.is_zero() {
            return Err(invalid("sys_resend_interval", "must be > 0"));
        }
        if self.prune_interval.is_zero() {
            return Err(invalid("prune_interval", "must be > 0"));
        }
        if self.min_adaptive_backoff > self.max_adaptive_backoff {
            return Err(invalid(
                "min_adaptive_backoff",
                "must not exceed max_adaptive_backoff",
            ));
        }
        self.watch_failure_detector.validate()
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}
