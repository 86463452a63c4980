// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deadline failure detector: available while the last heartbeat is recent enough.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::FailureDetector;
use crate::clock::{duration_ms, Clock};
use crate::config::DeadlineConfig;

/// Simplest availability policy: `now - last_heartbeat <= acceptable_heartbeat_pause`.
///
/// Monitoring starts with the first heartbeat; an unmonitored peer is available.
#[derive(Debug)]
pub struct DeadlineFailureDetector {
    acceptable_pause_ms: u64,
    clock: Arc<dyn Clock>,
    /// [`NO_HEARTBEAT`] until the first heartbeat.
    last_heartbeat_ms: AtomicU64,
}

const NO_HEARTBEAT: u64 = u64::MAX;

impl DeadlineFailureDetector {
    #[must_use]
    pub fn new(config: &DeadlineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            acceptable_pause_ms: duration_ms(config.acceptable_heartbeat_pause),
            clock,
            last_heartbeat_ms: AtomicU64::new(NO_HEARTBEAT),
        }
    }
}

impl FailureDetector for DeadlineFailureDetector {
    fn is_available(&self) -> bool {
        match self.last_heartbeat_ms.load(Ordering::Acquire) {
            NO_HEARTBEAT => true,
            last => self.clock.now_ms().saturating_sub(last) <= self.acceptable_pause_ms,
        }
    }

    fn is_monitoring(&self) -> bool {
        self.last_heartbeat_ms.load(Ordering::Acquire) != NO_HEARTBEAT
    }

    fn heartbeat(&self) {
        // A clock reading of u64::MAX would read as "never", keep it monitored
        let now = self.clock.now_ms().min(NO_HEARTBEAT - 1);
        self.last_heartbeat_ms.store(now, Ordering::Release);
    }
}
