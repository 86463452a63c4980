// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory collaborators for endpoint unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::codec::{Codec, DeadLetterReason, DecodedFrame, Dispatcher, Frame};
use super::context::EndpointContext;
use super::envelope::{HandleId, InboundMessage, OutboundEnvelope, Payload, RemoteRef};
use super::events::{EventPublisher, LifecycleEvent};
use super::receive_store::ReceiveBufferStore;
use super::transport::{AssociationHandle, DisassociateInfo, PendingAssociation, Transport};
use crate::address::{Address, Uid};
use crate::clock::ManualClock;
use crate::config::RemotingConfig;
use crate::error::{CodecError, TransportError};
use crate::metrics::RemotingMetrics;
use crate::reliability::{Ack, SeqNo};

pub(crate) fn local() -> Address {
    Address::new("local", "127.0.0.1", 2552)
}

pub(crate) fn remote() -> Address {
    Address::new("remote", "127.0.0.1", 2553)
}

/// Handle that records written frames; `write` fails while closed.
#[derive(Debug)]
pub(crate) struct RecordingHandle {
    id: HandleId,
    local: Address,
    remote: Address,
    uid: Uid,
    writable: AtomicBool,
    frames: Mutex<Vec<Frame>>,
    disassociated: Mutex<Option<DisassociateInfo>>,
}

impl RecordingHandle {
    pub(crate) fn new(id: u64, local: Address, remote: Address, uid: Uid) -> Arc<Self> {
        Arc::new(Self {
            id: HandleId(id),
            local,
            remote,
            uid,
            writable: AtomicBool::new(true),
            frames: Mutex::new(Vec::new()),
            disassociated: Mutex::new(None),
        })
    }

    pub(crate) fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    pub(crate) fn written(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.frames.lock().clear();
    }

    pub(crate) fn disassociated_with(&self) -> Option<DisassociateInfo> {
        *self.disassociated.lock()
    }
}

impl AssociationHandle for RecordingHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    fn local_address(&self) -> &Address {
        &self.local
    }

    fn remote_address(&self) -> &Address {
        &self.remote
    }

    fn remote_uid(&self) -> Uid {
        self.uid
    }

    fn write(&self, frame: &Frame) -> bool {
        if !self.writable.load(Ordering::SeqCst) {
            return false;
        }
        self.frames.lock().push(frame.clone());
        true
    }

    fn disassociate(&self, info: DisassociateInfo) {
        self.disassociated.lock().get_or_insert(info);
    }
}

/// Transport opening [`RecordingHandle`]s to remotes of a known incarnation.
///
/// Attempts complete at once unless held; held attempts wait for
/// [`RecordingTransport::release_held`].
#[derive(Debug)]
pub(crate) struct RecordingTransport {
    local: Address,
    next_handle: AtomicU64,
    uids: Mutex<HashMap<Address, Uid>>,
    unreachable: AtomicBool,
    hold: AtomicBool,
    held: Mutex<Vec<PendingAssociation>>,
    opened: Mutex<Vec<Arc<RecordingHandle>>>,
}

impl RecordingTransport {
    pub(crate) fn new(local: Address) -> Arc<Self> {
        Arc::new(Self {
            local,
            next_handle: AtomicU64::new(1_000),
            uids: Mutex::new(HashMap::new()),
            unreachable: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        })
    }

    /// Incarnation answered by `remote` from now on.
    pub(crate) fn set_uid(&self, remote: &Address, uid: Uid) {
        self.uids.lock().insert(remote.clone(), uid);
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub(crate) fn set_hold(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub(crate) fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Complete every held attempt, oldest first.
    pub(crate) fn release_held(&self) {
        let held: Vec<PendingAssociation> = self.held.lock().drain(..).collect();
        for pending in held {
            let result = self.connect(pending.remote(), pending.refuse_uid());
            pending.complete(result);
        }
    }

    fn connect(
        &self,
        remote: &Address,
        refuse_uid: Option<Uid>,
    ) -> Result<Arc<dyn AssociationHandle>, TransportError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::AssociationFailed(
                remote.to_string(),
                "connection refused".into(),
            ));
        }
        let uid = self.uids.lock().get(remote).copied().unwrap_or(1);
        if refuse_uid == Some(uid) {
            return Err(TransportError::RefusedUid {
                remote: remote.to_string(),
                uid,
            });
        }
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let handle = RecordingHandle::new(id, self.local.clone(), remote.clone(), uid);
        self.opened.lock().push(Arc::clone(&handle));
        Ok(handle)
    }

    pub(crate) fn opened(&self) -> Vec<Arc<RecordingHandle>> {
        self.opened.lock().clone()
    }

    pub(crate) fn last_opened(&self) -> Option<Arc<RecordingHandle>> {
        self.opened.lock().last().cloned()
    }
}

impl Transport for RecordingTransport {
    fn local_address(&self) -> &Address {
        &self.local
    }

    fn associate(&self, pending: PendingAssociation) {
        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().push(pending);
            return;
        }
        let result = self.connect(pending.remote(), pending.refuse_uid());
        pending.complete(result);
    }
}

/// Codec keeping decoded frames in a side table; a frame is its 8-byte key.
#[derive(Debug, Default)]
pub(crate) struct SideTableCodec {
    next: AtomicU64,
    frames: Mutex<HashMap<u64, DecodedFrame>>,
}

impl SideTableCodec {
    fn store(&self, decoded: DecodedFrame) -> Frame {
        let key = self.next.fetch_add(1, Ordering::SeqCst);
        self.frames.lock().insert(key, decoded);
        Frame::new(key.to_be_bytes().to_vec())
    }

    /// Frame carrying a sequenced (or not) message from `sender_address`.
    pub(crate) fn message_frame(
        &self,
        recipient: RemoteRef,
        payload: &[u8],
        seq: Option<i64>,
        ack: Option<Ack>,
    ) -> Frame {
        self.store(DecodedFrame {
            ack,
            message: Some(InboundMessage {
                recipient,
                sender: None,
                payload: Payload::from(payload),
                seq: seq.map(SeqNo::new),
            }),
        })
    }

    pub(crate) fn ack_frame(&self, ack: Ack) -> Frame {
        self.store(DecodedFrame { ack: Some(ack), message: None })
    }

    /// Decode every frame, panicking on unknown keys.
    pub(crate) fn decode_all(&self, frames: &[Frame]) -> Vec<DecodedFrame> {
        frames
            .iter()
            .map(|f| self.decode_message(f).expect("known frame"))
            .collect()
    }

    /// Sequence numbers of the messages in `frames`.
    pub(crate) fn seqs(&self, frames: &[Frame]) -> Vec<i64> {
        self.decode_all(frames)
            .into_iter()
            .filter_map(|d| d.message.and_then(|m| m.seq))
            .map(SeqNo::raw)
            .collect()
    }
}

impl Codec for SideTableCodec {
    fn construct_message(
        &self,
        _local: &Address,
        envelope: &OutboundEnvelope,
        seq: Option<SeqNo>,
        ack: Option<&Ack>,
    ) -> Result<Frame, CodecError> {
        if envelope.payload.as_ref() == b"unencodable" {
            return Err(CodecError::Encode("unencodable payload".into()));
        }
        Ok(self.store(DecodedFrame {
            ack: ack.cloned(),
            message: Some(InboundMessage {
                recipient: envelope.recipient.clone(),
                sender: envelope.sender.clone(),
                payload: envelope.payload.clone(),
                seq,
            }),
        }))
    }

    fn construct_pure_ack(&self, ack: &Ack) -> Frame {
        self.ack_frame(ack.clone())
    }

    fn decode_message(&self, frame: &Frame) -> Result<DecodedFrame, CodecError> {
        let key: [u8; 8] = frame
            .as_bytes()
            .try_into()
            .map_err(|_| CodecError::Decode("bad frame length".into()))?;
        self.frames
            .lock()
            .get(&u64::from_be_bytes(key))
            .cloned()
            .ok_or_else(|| CodecError::Decode("unknown frame".into()))
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingDispatcher {
    pub(crate) delivered: Mutex<Vec<Payload>>,
    pub(crate) dead_letters: Mutex<Vec<(OutboundEnvelope, DeadLetterReason)>>,
}

impl RecordingDispatcher {
    pub(crate) fn delivered_payloads(&self) -> Vec<Vec<u8>> {
        self.delivered.lock().iter().map(|p| p.to_vec()).collect()
    }

    pub(crate) fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().len()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&self, _recipient: &RemoteRef, payload: &Payload, _sender: Option<&RemoteRef>) {
        self.delivered.lock().push(payload.clone());
    }

    fn dead_letter(&self, envelope: &OutboundEnvelope, reason: DeadLetterReason) {
        self.dead_letters.lock().push((envelope.clone(), reason));
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingPublisher {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingPublisher {
    pub(crate) fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: &LifecycleEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Context plus handles on its recording collaborators.
pub(crate) struct Fixture {
    pub(crate) ctx: EndpointContext,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) codec: Arc<SideTableCodec>,
    pub(crate) dispatcher: Arc<RecordingDispatcher>,
}

impl Fixture {
    pub(crate) fn new(config: RemotingConfig) -> Self {
        let clock = Arc::new(ManualClock::new(10_000));
        let codec = Arc::new(SideTableCodec::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let ctx = EndpointContext {
            local_address: local(),
            config: Arc::new(config),
            clock: clock.clone(),
            codec: codec.clone(),
            dispatcher: dispatcher.clone(),
            metrics: Arc::new(RemotingMetrics::new()),
            receive_buffers: Arc::new(ReceiveBufferStore::new()),
        };
        Self {
            ctx,
            clock,
            codec,
            dispatcher,
        }
    }

    pub(crate) fn recipient(&self) -> RemoteRef {
        RemoteRef::new(remote(), "/system/watcher")
    }

    pub(crate) fn system(&self, payload: &str) -> OutboundEnvelope {
        OutboundEnvelope::system(self.recipient(), payload.as_bytes().to_vec())
    }

    pub(crate) fn user(&self, payload: &str) -> OutboundEnvelope {
        OutboundEnvelope::user(self.recipient(), payload.as_bytes().to_vec())
    }
}
