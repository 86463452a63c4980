// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HDDS Remoting
//!
//! Reliable system-message delivery and association lifecycle between actor
//! systems, on top of a pluggable transport.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hdds_remoting::{EndpointManager, RemotingConfig, RemotingRuntime, DEFAULT_TICK_INTERVAL};
//!
//! let manager = EndpointManager::builder(transport, codec, dispatcher)
//!     .config(RemotingConfig::default())
//!     .build()?;
//! let runtime = RemotingRuntime::start(manager, DEFAULT_TICK_INTERVAL)?;
//! let remoting = runtime.handle();
//!
//! // From the transport threads
//! remoting.inbound_association(handle)?;
//! remoting.inbound_frame(handle_id, frame)?;
//!
//! // From the actor runtime
//! remoting.send(OutboundEnvelope::system(recipient, payload))?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                  Actor runtime (dispatcher, watchers)               |
//! +---------------------------------------------------------------------+
//! |  RemotingRuntime -> EndpointManager -> supervisors / writers /      |
//! |                     readers, EndpointRegistry (gate, quarantine)    |
//! +---------------------------------------------------------------------+
//! |  reliability: SeqNo, Ack, AckedSendBuffer, AckedReceiveBuffer       |
//! +---------------------------------------------------------------------+
//! |  Transport + Codec (external): association handles, frames          |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EndpointManager`] | Owns every endpoint, routes messages, gates and quarantines |
//! | [`RemotingRuntime`] | Thread driving a manager |
//! | [`AckedSendBuffer`] / [`AckedReceiveBuffer`] | Resend and reorder buffers |
//! | [`PhiAccrualFailureDetector`] | Heartbeat based suspicion level |
//! | [`NodeLivenessMonitor`] | Reports unreachable watched nodes |
//!
//! ## Modules Overview
//!
//! - [`reliability`] - sequence numbers and acked buffers
//! - [`endpoint`] - endpoint state machines and the manager
//! - [`failure_detector`] - deadline and phi accrual detectors
//! - [`config`] - configuration and YAML loading

/// Node addresses and incarnation uids.
pub mod address;
/// Injectable millisecond clocks.
pub mod clock;
/// Remoting configuration and YAML loading.
pub mod config;
/// Endpoint state machines, registry and manager.
pub mod endpoint;
pub mod error;
/// Deadline and phi accrual failure detectors.
pub mod failure_detector;
pub mod metrics;
/// Sequence numbers, acknowledgments and acked buffers.
pub mod reliability;
pub mod runtime;
/// Liveness monitoring of watched nodes.
pub mod watcher;

pub use address::{Address, Uid, UniqueAddress};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{DeadlineConfig, PhiAccrualConfig, RemotingConfig};
pub use endpoint::{
    AssociationFailure, AssociationHandle, Codec, DeadLetterReason, DisassociateInfo, Dispatcher,
    EndpointManager, EndpointPolicy, EventPublisher, Frame, LifecycleEvent, ManagerCommand,
    OutboundEnvelope, PendingAssociation, RemoteRef, Transport,
};
pub use error::{BufferError, CodecError, ConfigError, RuntimeStopped, TransportError};
pub use failure_detector::{
    DeadlineFailureDetector, DefaultFailureDetectorRegistry, FailureDetector,
    FailureDetectorRegistry, PhiAccrualFailureDetector,
};
pub use metrics::{RemotingMetrics, RemotingMetricsSnapshot};
pub use reliability::{Ack, AckedReceiveBuffer, AckedSendBuffer, HasSeqNo, SeqNo, Sequenced};
pub use runtime::{RemotingHandle, RemotingRuntime, DEFAULT_TICK_INTERVAL};
pub use watcher::NodeLivenessMonitor;
