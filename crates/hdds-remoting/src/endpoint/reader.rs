// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint reader: inbound side of one association handle.
//!
//! Decodes frames, forwards piggybacked acknowledgments to the reliable
//! delivery supervisor, and releases system messages in sequence order
//! through the receive buffer. The receive buffer outlives the reader in the
//! [`ReceiveBufferStore`](super::ReceiveBufferStore) so the next reader of the
//! same link resumes where this one stopped.

use std::sync::Arc;

use super::codec::Frame;
use super::context::EndpointContext;
use super::envelope::{EndpointId, HandleId, InboundMessage, SequencedInbound};
use super::failure::AssociationFailure;
use super::receive_store::Link;
use super::transport::{AssociationHandle, DisassociateInfo};
use crate::address::Uid;
use crate::reliability::{Ack, AckedReceiveBuffer, HasSeqNo};

/// Output of the reader, routed by the endpoint manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEffect {
    /// Acknowledgment from the remote side, for the owner's supervisor.
    AckReceived(Ack),
    /// Acknowledgment to send back, for the owner's writer.
    OutboundAck(Ack),
    /// Reader terminated. `failure` is set when the remote side closed the handle.
    Stopped {
        handle: HandleId,
        failure: Option<AssociationFailure>,
    },
}

/// Inbound side of one association handle.
#[derive(Debug)]
pub struct EndpointReader {
    ctx: EndpointContext,
    owner: EndpointId,
    handle: Arc<dyn AssociationHandle>,
    link: Link,
    uid: Uid,
    reliable_delivery: bool,
    buffer: AckedReceiveBuffer<SequencedInbound>,
    reading: bool,
    stopped: bool,
}

impl EndpointReader {
    /// `reliable_delivery` is set when the owner is a writable endpoint whose
    /// supervisor consumes acknowledgments.
    #[must_use]
    pub fn new(
        ctx: EndpointContext,
        owner: EndpointId,
        handle: Arc<dyn AssociationHandle>,
        reliable_delivery: bool,
    ) -> Self {
        let link = Link::new(
            handle.local_address().clone(),
            handle.remote_address().clone(),
        );
        let uid = handle.remote_uid();
        Self {
            ctx,
            owner,
            handle,
            link,
            uid,
            reliable_delivery,
            buffer: AckedReceiveBuffer::new(),
            reading: true,
            stopped: false,
        }
    }

    #[must_use]
    pub fn owner(&self) -> EndpointId {
        self.owner
    }

    #[must_use]
    pub fn handle_id(&self) -> HandleId {
        self.handle.id()
    }

    #[must_use]
    pub fn is_reading(&self) -> bool {
        self.reading && !self.stopped
    }

    #[must_use]
    pub fn receive_buffer(&self) -> &AckedReceiveBuffer<SequencedInbound> {
        &self.buffer
    }

    /// Resume the saved receive buffer of the same remote incarnation.
    pub fn start(&mut self) -> Vec<ReaderEffect> {
        match self.ctx.receive_buffers.get(&self.link) {
            Some(saved) if saved.uid == self.uid => {
                log::debug!(
                    "[EndpointReader::start] Resuming receive buffer of {} (last delivered {})",
                    self.link.remote,
                    saved.buffer.last_delivered()
                );
                self.buffer = self.buffer.merge_from(&saved.buffer);
                self.deliver_and_ack()
            }
            _ => Vec::new(),
        }
    }

    pub fn receive_frame(&mut self, frame: &Frame) -> Vec<ReaderEffect> {
        if self.stopped {
            return Vec::new();
        }
        let decoded = match self.ctx.codec.decode_message(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!(
                    "[EndpointReader::receive_frame] Dropping undecodable frame from {}: {}",
                    self.link.remote,
                    e
                );
                return Vec::new();
            }
        };

        let mut effects = Vec::new();
        if let Some(ack) = decoded.ack {
            if self.reliable_delivery {
                effects.push(ReaderEffect::AckReceived(ack));
            }
        }
        if !self.reading {
            return effects;
        }
        if let Some(message) = decoded.message {
            if message.seq.is_none() {
                // Unsequenced messages bypass the receive buffer
                self.dispatch(&message);
            } else if let Some(sequenced) = SequencedInbound::from_message(message) {
                let window = self.ctx.config.system_message_buffer_size;
                if self.buffer.is_within_window(sequenced.seq(), window) {
                    self.buffer = self.buffer.receive(sequenced);
                    effects.extend(self.deliver_and_ack());
                } else {
                    // Not acked: a sender that really is this far ahead resends it
                    log::warn!(
                        "[EndpointReader::receive_frame] Dropping seq {} from {}: more than {} ahead of last delivered {}",
                        sequenced.seq(),
                        self.link.remote,
                        window,
                        self.buffer.last_delivered()
                    );
                }
            }
        }
        effects
    }

    /// Save the receive buffer and ignore further messages; acknowledgments
    /// still reach the supervisor.
    pub fn stop_reading(&mut self) {
        if self.reading {
            self.save_state();
            self.reading = false;
        }
    }

    /// The transport reported the handle as closed by the remote side.
    pub fn disassociated(&mut self, info: DisassociateInfo) -> Vec<ReaderEffect> {
        log::debug!(
            "[EndpointReader::disassociated] {} disassociated ({:?})",
            self.link.remote,
            info
        );
        self.terminate(Some(AssociationFailure::from_disassociation(info)))
    }

    /// Stop on request of the owning writer.
    pub fn stop(&mut self) -> Vec<ReaderEffect> {
        self.terminate(None)
    }

    fn terminate(&mut self, failure: Option<AssociationFailure>) -> Vec<ReaderEffect> {
        if self.stopped {
            return Vec::new();
        }
        if self.reading {
            self.save_state();
        }
        self.stopped = true;
        vec![ReaderEffect::Stopped {
            handle: self.handle.id(),
            failure,
        }]
    }

    fn deliver_and_ack(&mut self) -> Vec<ReaderEffect> {
        let (updated, deliverable, ack) = self.buffer.extract_deliverable();
        self.buffer = updated;
        for sequenced in &deliverable {
            self.dispatch(sequenced.message());
        }
        vec![ReaderEffect::OutboundAck(ack)]
    }

    fn dispatch(&self, message: &InboundMessage) {
        self.ctx.dispatcher.dispatch(
            &message.recipient,
            &message.payload,
            message.sender.as_ref(),
        );
    }

    fn save_state(&self) {
        self.ctx
            .receive_buffers
            .save_state(&self.link, self.uid, &self.buffer);
    }
}
