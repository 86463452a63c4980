// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message envelopes and endpoint identifiers.

use std::fmt;
use std::sync::Arc;

use crate::address::Address;
use crate::reliability::{HasSeqNo, SeqNo};

/// Serialized message body. Serialization itself happens outside this crate.
pub type Payload = Arc<[u8]>;

/// Reference to an actor living on some node: its node address plus its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteRef {
    address: Address,
    path: Arc<str>,
}

impl RemoteRef {
    #[must_use]
    pub fn new(address: Address, path: &str) -> Self {
        Self {
            address,
            path: Arc::from(path),
        }
    }

    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.path.trim_start_matches('/'))
    }
}

/// Delivery class of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Control/lifecycle traffic: sequenced, acknowledged, redelivered.
    System,
    /// Ordinary fire-and-forget traffic.
    User,
}

/// Message handed to the endpoint layer for delivery to a remote actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    pub recipient: RemoteRef,
    pub sender: Option<RemoteRef>,
    pub payload: Payload,
    pub kind: MessageKind,
}

impl OutboundEnvelope {
    #[must_use]
    pub fn system(recipient: RemoteRef, payload: impl Into<Payload>) -> Self {
        Self {
            recipient,
            sender: None,
            payload: payload.into(),
            kind: MessageKind::System,
        }
    }

    #[must_use]
    pub fn user(recipient: RemoteRef, payload: impl Into<Payload>) -> Self {
        Self {
            recipient,
            sender: None,
            payload: payload.into(),
            kind: MessageKind::User,
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: RemoteRef) -> Self {
        self.sender = Some(sender);
        self
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }

    /// Destination node.
    #[must_use]
    pub fn remote_address(&self) -> &Address {
        self.recipient.address()
    }
}

/// Outbound envelope on its way to a writer, sequenced when it is a system message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub envelope: OutboundEnvelope,
    pub seq: Option<SeqNo>,
}

impl OutboundMessage {
    #[must_use]
    pub fn unsequenced(envelope: OutboundEnvelope) -> Self {
        Self {
            envelope,
            seq: None,
        }
    }
}

/// Decoded inbound message.
///
/// `seq` is present for system messages, which go through the receive buffer;
/// other messages are dispatched as soon as they are decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub recipient: RemoteRef,
    pub sender: Option<RemoteRef>,
    pub payload: Payload,
    pub seq: Option<SeqNo>,
}

/// Inbound system message held by a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedInbound {
    seq: SeqNo,
    message: InboundMessage,
}

impl SequencedInbound {
    /// `None` for unsequenced messages.
    #[must_use]
    pub fn from_message(message: InboundMessage) -> Option<Self> {
        message.seq.map(|seq| Self { seq, message })
    }

    #[must_use]
    pub fn message(&self) -> &InboundMessage {
        &self.message
    }
}

impl HasSeqNo for SequencedInbound {
    fn seq(&self) -> SeqNo {
        self.seq
    }
}

/// Identity of an endpoint owned by the endpoint manager.
///
/// A writable endpoint (reliable delivery supervisor) keeps its id across
/// writer restarts; a read-only endpoint is a bare writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

/// Identity of a physical association handle, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_ref_display() {
        let r = RemoteRef::new(Address::new("sys", "host", 2552), "/user/echo");
        assert_eq!(r.to_string(), "remoting://sys@host:2552/user/echo");
    }

    #[test]
    fn test_sequenced_inbound_requires_seq() {
        let recipient = RemoteRef::new(Address::new("sys", "host", 1), "a");
        let mut msg = InboundMessage {
            recipient,
            sender: None,
            payload: Arc::from(&b"x"[..]),
            seq: None,
        };
        assert!(SequencedInbound::from_message(msg.clone()).is_none());
        msg.seq = Some(SeqNo::new(4));
        let sequenced = SequencedInbound::from_message(msg).expect("sequenced");
        assert_eq!(sequenced.seq(), SeqNo::new(4));
    }
}
