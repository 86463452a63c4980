// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Failure Detection
//!
//! Turns a stream of heartbeats into an availability judgment.
//!
//! | Component | Role |
//! |-----------|------|
//! | [`FailureDetector`] | Contract: `is_available`, `is_monitoring`, `heartbeat` |
//! | [`DeadlineFailureDetector`] | Fixed maximum silence |
//! | [`PhiAccrualFailureDetector`] | Continuous suspicion level from interval statistics |
//! | [`DefaultFailureDetectorRegistry`] | One detector per peer, created on first heartbeat |
//!
//! Detectors take `&self`: heartbeats may arrive concurrently from several
//! transport reader threads, state changes are lock-free snapshot swaps.

mod deadline;
mod history;
mod phi_accrual;
mod registry;

pub use deadline::DeadlineFailureDetector;
pub use history::HeartbeatHistory;
pub use phi_accrual::{phi, PhiAccrualFailureDetector};
pub use registry::{DefaultFailureDetectorRegistry, DetectorFactory, FailureDetectorRegistry};

/// Availability judgment for one monitored resource.
pub trait FailureDetector: Send + Sync + std::fmt::Debug {
    /// True if the resource is considered up. Unmonitored resources are available.
    fn is_available(&self) -> bool;

    /// True once at least one heartbeat was recorded.
    fn is_monitoring(&self) -> bool;

    /// Record a heartbeat at the current clock time.
    fn heartbeat(&self);
}
