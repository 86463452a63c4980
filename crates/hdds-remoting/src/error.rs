// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types returned by hdds-remoting operations.
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | [`BufferError`] | acked send buffer | returned synchronously, never swallowed |
//! | [`TransportError`] | transport collaborators | association attempt gated |
//! | [`CodecError`] | codec collaborators | single frame dropped (logged) |
//! | [`ConfigError`] | configuration validation / loading | returned to caller |
//!
//! Association-level failures are modelled separately by
//! [`AssociationFailure`](crate::endpoint::AssociationFailure): they are turned
//! into gate/quarantine transitions and never leave the endpoint layer.

use crate::reliability::SeqNo;

/// Protocol violations and capacity exhaustion of the acked buffers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Appended message does not carry a sequence number above the buffer's maximum.
    #[error("sequence number {seq} is not greater than the highest buffered sequence number {max_seq}")]
    OutOfOrder {
        /// Rejected sequence number.
        seq: SeqNo,
        /// Highest sequence number ever buffered.
        max_seq: SeqNo,
    },

    /// The buffer already holds `capacity` unacknowledged messages.
    #[error("send buffer capacity of {capacity} unacknowledged messages exceeded")]
    CapacityExceeded {
        /// Configured capacity.
        capacity: usize,
    },

    /// Acknowledgment references a sequence number that was never sent.
    #[error("acknowledgment {cumulative_ack} is beyond the highest sent sequence number {max_seq}")]
    InvalidAck {
        /// Cumulative acknowledgment received.
        cumulative_ack: SeqNo,
        /// Highest sequence number ever buffered.
        max_seq: SeqNo,
    },

    /// Negatively acknowledged messages are no longer available for resend.
    ///
    /// Fatal for the owning association: both ends are desynchronized.
    #[error("cannot resend negatively acknowledged messages {missing:?}: already dropped from the buffer")]
    ResendUnfulfillable {
        /// Nacked sequence numbers without a buffered message.
        missing: Vec<SeqNo>,
    },
}

/// Association attempt failure reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Remote could not be reached.
    #[error("association with {0} failed: {1}")]
    AssociationFailed(String, String),

    /// Handshake completed with the incarnation the caller asked to refuse.
    #[error("remote {remote} answered with refused uid {uid}")]
    RefusedUid {
        /// Remote address (display form).
        remote: String,
        /// Refused incarnation.
        uid: u64,
    },

    /// Transport was shut down.
    #[error("transport is shut down")]
    Shutdown,
}

/// Frame (de)serialization failure for a single message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

/// Invalid configuration or configuration file problem.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range.
    #[error("invalid configuration value for `{field}`: {reason}")]
    InvalidValue {
        /// Offending field name.
        field: &'static str,
        /// Human-readable constraint.
        reason: String,
    },

    /// Configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// The remoting runtime thread is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("remoting runtime is stopped")]
pub struct RuntimeStopped;
