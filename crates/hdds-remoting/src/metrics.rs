// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics for the endpoint layer
//!
//! Tracks system message delivery, dead letters, and association failures.
//!
//! # Thread Safety
//!
//! All counters are atomics updated with `Relaxed` ordering. The endpoint
//! manager shares one [`RemotingMetrics`] across every endpoint it owns and
//! hands an `Arc` of it to observers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Endpoint layer metrics collector.
#[derive(Debug, Default)]
pub struct RemotingMetrics {
    /// System messages appended to a resend buffer.
    sys_msgs_buffered: AtomicU64,
    /// System messages written again after a resend tick or nack.
    sys_msgs_resent: AtomicU64,
    /// System messages released from a resend buffer by an acknowledgment.
    sys_msgs_acked: AtomicU64,
    /// Largest resend buffer seen (high-water mark).
    max_resend_buffer: AtomicU64,
    /// Pure acknowledgment frames sent on ack-idle.
    pure_acks_sent: AtomicU64,
    /// Messages routed to the dead-letter sink.
    dead_letters: AtomicU64,
    /// Associations gated.
    gates: AtomicU64,
    /// Peer incarnations quarantined.
    quarantines: AtomicU64,
    /// Inbound associations handed over to an existing endpoint.
    handoffs: AtomicU64,
}

/// Point-in-time copy of [`RemotingMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemotingMetricsSnapshot {
    pub sys_msgs_buffered: u64,
    pub sys_msgs_resent: u64,
    pub sys_msgs_acked: u64,
    pub max_resend_buffer: u64,
    pub pure_acks_sent: u64,
    pub dead_letters: u64,
    pub gates: u64,
    pub quarantines: u64,
    pub handoffs: u64,
}

impl RemotingMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_buffered(&self, resend_buffer_len: usize) {
        self.sys_msgs_buffered.fetch_add(1, Ordering::Relaxed);
        self.update_max_resend_buffer(resend_buffer_len as u64);
    }

    /// Update the resend buffer high-water mark.
    fn update_max_resend_buffer(&self, len: u64) {
        let mut current = self.max_resend_buffer.load(Ordering::Relaxed);
        while len > current {
            match self.max_resend_buffer.compare_exchange_weak(
                current,
                len,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn increment_resent(&self, count: u64) {
        self.sys_msgs_resent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_acked(&self, count: u64) {
        self.sys_msgs_acked.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_pure_acks(&self) {
        self.pure_acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dead_letters(&self) {
        self.dead_letters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_gates(&self) {
        self.gates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_quarantines(&self) {
        self.quarantines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_handoffs(&self) {
        self.handoffs.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> RemotingMetricsSnapshot {
        RemotingMetricsSnapshot {
            sys_msgs_buffered: self.sys_msgs_buffered.load(Ordering::Relaxed),
            sys_msgs_resent: self.sys_msgs_resent.load(Ordering::Relaxed),
            sys_msgs_acked: self.sys_msgs_acked.load(Ordering::Relaxed),
            max_resend_buffer: self.max_resend_buffer.load(Ordering::Relaxed),
            pure_acks_sent: self.pure_acks_sent.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
            gates: self.gates.load(Ordering::Relaxed),
            quarantines: self.quarantines.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_high_water_mark() {
        let metrics = RemotingMetrics::new();
        metrics.record_buffered(1);
        metrics.record_buffered(3);
        metrics.record_buffered(2);
        metrics.increment_acked(2);
        metrics.increment_dead_letters();
        metrics.increment_quarantines();

        let snap = metrics.snapshot();
        assert_eq!(snap.sys_msgs_buffered, 3);
        assert_eq!(snap.max_resend_buffer, 3);
        assert_eq!(snap.sys_msgs_acked, 2);
        assert_eq!(snap.dead_letters, 1);
        assert_eq!(snap.quarantines, 1);
        assert_eq!(snap.gates, 0);
    }
}
