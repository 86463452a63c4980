// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame codec and message dispatch interfaces.
//!
//! No wire format is defined here: a [`Codec`] only needs to carry the
//! acknowledgment, the optional sequence number and the envelope fields.

use std::fmt;

use super::envelope::{InboundMessage, OutboundEnvelope, Payload, RemoteRef};
use crate::address::Address;
use crate::error::CodecError;
use crate::reliability::{Ack, SeqNo};

/// Encoded protocol data unit, opaque to the endpoint layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame(Vec<u8>);

impl Frame {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of decoding one frame. Either part may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    pub ack: Option<Ack>,
    pub message: Option<InboundMessage>,
}

/// Encodes outbound messages and acknowledgments, decodes inbound frames.
pub trait Codec: Send + Sync {
    /// Encode a message, piggybacking `ack` when present.
    ///
    /// # Errors
    ///
    /// [`CodecError::Encode`]; the message is dropped, the association stays up.
    fn construct_message(
        &self,
        local: &Address,
        envelope: &OutboundEnvelope,
        seq: Option<SeqNo>,
        ack: Option<&Ack>,
    ) -> Result<Frame, CodecError>;

    /// Encode an acknowledgment-only frame.
    fn construct_pure_ack(&self, ack: &Ack) -> Frame;

    /// # Errors
    ///
    /// [`CodecError::Decode`]; the frame is dropped.
    fn decode_message(&self, frame: &Frame) -> Result<DecodedFrame, CodecError>;
}

/// Why a message ended up in dead letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadLetterReason {
    /// The destination address is gated.
    Gated,
    /// The endpoint holding the message stopped before writing it.
    EndpointStopped,
    /// The endpoint manager is shutting down.
    ShuttingDown,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gated => write!(f, "address is gated"),
            Self::EndpointStopped => write!(f, "endpoint stopped"),
            Self::ShuttingDown => write!(f, "remoting is shutting down"),
        }
    }
}

/// Hands decoded messages to the enclosing actor runtime.
pub trait Dispatcher: Send + Sync {
    /// Deliver an inbound message, in order for system messages.
    fn dispatch(&self, recipient: &RemoteRef, payload: &Payload, sender: Option<&RemoteRef>);

    /// Outbound message that could not be delivered.
    fn dead_letter(&self, envelope: &OutboundEnvelope, reason: DeadLetterReason);
}
