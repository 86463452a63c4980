// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML configuration loader.
//!
//! Every field is optional; missing fields keep their [`RemotingConfig`] default.
//! Durations are given in milliseconds.
//!
//! # Example YAML
//!
//! ```yaml
//! # remoting.yaml
//! system_message_buffer_size: 5000
//! retry_gate_closed_for_ms: 2000
//! quarantine_duration_ms: 86400000
//! use_passive_connections: false
//! watch_failure_detector:
//!   threshold: 8.0
//!   acceptable_heartbeat_pause_ms: 3000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::{PhiAccrualConfig, RemotingConfig};
use crate::error::ConfigError;

/// YAML configuration loader.
pub struct YamlConfigLoader;

/// Root YAML document.
#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct YamlRemotingDocument {
    pub system_message_buffer_size: Option<usize>,
    pub sys_msg_ack_timeout_ms: Option<u64>,
    pub sys_resend_interval_ms: Option<u64>,
    pub sys_resend_limit: Option<usize>,
    pub initial_sys_msg_delivery_timeout_ms: Option<u64>,
    pub retry_gate_closed_for_ms: Option<u64>,
    pub quarantine_duration_ms: Option<u64>,
    pub quarantine_silent_system_timeout_ms: Option<u64>,
    pub prune_interval_ms: Option<u64>,
    pub backoff_interval_ms: Option<u64>,
    pub send_buffer_batch_size: Option<usize>,
    pub min_adaptive_backoff_us: Option<u64>,
    pub max_adaptive_backoff_us: Option<u64>,
    pub use_passive_connections: Option<bool>,
    pub log_buffer_size_exceeding: Option<usize>,
    pub flush_wait_ms: Option<u64>,
    pub watch_failure_detector: Option<YamlPhiAccrual>,
}

/// Phi accrual section.
#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct YamlPhiAccrual {
    pub threshold: Option<f64>,
    pub max_sample_size: Option<usize>,
    pub min_std_deviation_ms: Option<u64>,
    pub acceptable_heartbeat_pause_ms: Option<u64>,
    pub first_heartbeat_estimate_ms: Option<u64>,
}

impl YamlConfigLoader {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// I/O, parse or validation failure.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<RemotingConfig, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse and validate YAML content.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn parse_yaml(content: &str) -> Result<RemotingConfig, ConfigError> {
        let doc: YamlRemotingDocument = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        let config = Self::document_to_config(&doc);
        config.validate()?;
        Ok(config)
    }

    /// Overlay the document on top of the defaults.
    #[must_use]
    pub fn document_to_config(doc: &YamlRemotingDocument) -> RemotingConfig {
        let mut config = RemotingConfig::default();
        let ms = Duration::from_millis;

        if let Some(v) = doc.system_message_buffer_size {
            config.system_message_buffer_size = v;
        }
        if let Some(v) = doc.sys_msg_ack_timeout_ms {
            config.sys_msg_ack_timeout = ms(v);
        }
        if let Some(v) = doc.sys_resend_interval_ms {
            config.sys_resend_interval = ms(v);
        }
        if let Some(v) = doc.sys_resend_limit {
            config.sys_resend_limit = v;
        }
        if let Some(v) = doc.initial_sys_msg_delivery_timeout_ms {
            config.initial_sys_msg_delivery_timeout = ms(v);
        }
        if let Some(v) = doc.retry_gate_closed_for_ms {
            config.retry_gate_closed_for = ms(v);
        }
        if let Some(v) = doc.quarantine_duration_ms {
            config.quarantine_duration = ms(v);
        }
        if let Some(v) = doc.quarantine_silent_system_timeout_ms {
            config.quarantine_silent_system_timeout = ms(v);
        }
        if let Some(v) = doc.prune_interval_ms {
            config.prune_interval = ms(v);
        }
        if let Some(v) = doc.backoff_interval_ms {
            config.backoff_interval = ms(v);
        }
        if let Some(v) = doc.send_buffer_batch_size {
            config.send_buffer_batch_size = v;
        }
        if let Some(v) = doc.min_adaptive_backoff_us {
            config.min_adaptive_backoff = Duration::from_micros(v);
        }
        if let Some(v) = doc.max_adaptive_backoff_us {
            config.max_adaptive_backoff = Duration::from_micros(v);
        }
        if let Some(v) = doc.use_passive_connections {
            config.use_passive_connections = v;
        }
        if let Some(v) = doc.log_buffer_size_exceeding {
            config.log_buffer_size_exceeding = v;
        }
        if let Some(v) = doc.flush_wait_ms {
            config.flush_wait = ms(v);
        }
        if let Some(fd) = &doc.watch_failure_detector {
            config.watch_failure_detector = Self::phi_section(fd);
        }
        config
    }

    fn phi_section(section: &YamlPhiAccrual) -> PhiAccrualConfig {
        let mut fd = PhiAccrualConfig::default();
        if let Some(v) = section.threshold {
            fd.threshold = v;
        }
        if let Some(v) = section.max_sample_size {
            fd.max_sample_size = v;
        }
        if let Some(v) = section.min_std_deviation_ms {
            fd.min_std_deviation = Duration::from_millis(v);
        }
        if let Some(v) = section.acceptable_heartbeat_pause_ms {
            fd.acceptable_heartbeat_pause = Duration::from_millis(v);
        }
        if let Some(v) = section.first_heartbeat_estimate_ms {
            fd.first_heartbeat_estimate = Duration::from_millis(v);
        }
        fd
    }
}
