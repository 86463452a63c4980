// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(dead_code)] // Each test binary uses a different subset

//! In-memory network connecting several endpoint managers.
//!
//! Writes on an association handle and outbound association attempts are
//! queued on the [`Network`]; tests call [`Network::pump`] to hand them to the
//! managers. Frames are keys into a codec table shared by every node.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hdds_remoting::endpoint::{DecodedFrame, HandleId, InboundMessage, Payload};
use hdds_remoting::{
    Ack, Address, AssociationHandle, Codec, CodecError, DeadLetterReason, DisassociateInfo,
    Dispatcher, EndpointManager, EventPublisher, Frame, LifecycleEvent, ManualClock,
    OutboundEnvelope, PendingAssociation, RemoteRef, RemotingConfig, SeqNo, Transport,
    TransportError, Uid,
};
use parking_lot::Mutex;

pub fn addr(system: &str, port: u16) -> Address {
    Address::new(system, "127.0.0.1", port)
}

pub fn system_to(address: &Address, payload: &str) -> OutboundEnvelope {
    OutboundEnvelope::system(RemoteRef::new(address.clone(), "/system/watcher"), payload.as_bytes().to_vec())
}

pub fn user_to(address: &Address, payload: &str) -> OutboundEnvelope {
    OutboundEnvelope::user(RemoteRef::new(address.clone(), "/user/echo"), payload.as_bytes().to_vec())
}

// ============================================================================
// Codec
// ============================================================================

#[derive(Debug, Default)]
pub struct SharedCodec {
    next: AtomicU64,
    frames: Mutex<HashMap<u64, DecodedFrame>>,
}

impl SharedCodec {
    fn store(&self, decoded: DecodedFrame) -> Frame {
        let key = self.next.fetch_add(1, Ordering::SeqCst);
        self.frames.lock().insert(key, decoded);
        Frame::new(key.to_be_bytes().to_vec())
    }
}

impl Codec for SharedCodec {
    fn construct_message(
        &self,
        _local: &Address,
        envelope: &OutboundEnvelope,
        seq: Option<SeqNo>,
        ack: Option<&Ack>,
    ) -> Result<Frame, CodecError> {
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
        self.store(DecodedFrame {
            ack: Some(ack.clone()),
            message: None,
        })
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

// ============================================================================
// Dispatcher / publisher
// ============================================================================

#[derive(Debug, Default)]
pub struct Inbox {
    delivered: Mutex<Vec<String>>,
    dead_letters: Mutex<Vec<(String, DeadLetterReason)>>,
}

impl Inbox {
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().clone()
    }

    pub fn dead_letters(&self) -> Vec<(String, DeadLetterReason)> {
        self.dead_letters.lock().clone()
    }
}

fn text(payload: &Payload) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

impl Dispatcher for Inbox {
    fn dispatch(&self, _recipient: &RemoteRef, payload: &Payload, _sender: Option<&RemoteRef>) {
        self.delivered.lock().push(text(payload));
    }

    fn dead_letter(&self, envelope: &OutboundEnvelope, reason: DeadLetterReason) {
        self.dead_letters.lock().push((text(&envelope.payload), reason));
    }
}

#[derive(Debug, Default)]
pub struct EventLog(Mutex<Vec<LifecycleEvent>>);

impl EventLog {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.0.lock().clone()
    }
}

impl EventPublisher for EventLog {
    fn publish(&self, event: &LifecycleEvent) {
        self.0.lock().push(event.clone());
    }
}

// ============================================================================
// Network
// ============================================================================

enum Delivery {
    /// Outbound attempt of the node the delivery is queued for.
    Connect(PendingAssociation),
    Inbound(Arc<dyn AssociationHandle>),
    Frame { handle: HandleId, frame: Frame },
    Disassociated { handle: HandleId, info: DisassociateInfo },
}

#[derive(Default)]
struct NetworkState {
    uids: HashMap<Address, Uid>,
    queue: VecDeque<(Address, Delivery)>,
    drop_next: HashMap<Address, usize>,
    frames_sent: HashMap<Address, usize>,
    /// Open associations as (handle, owner, peer address).
    pipes: Vec<(HandleId, Address, Address)>,
    /// Handles whose writes and close notifications are lost.
    severed: HashSet<HandleId>,
}

/// Shared wire between the nodes of one test.
#[derive(Default)]
pub struct Network {
    state: Mutex<NetworkState>,
    next_handle: AtomicU64,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register (or restart) the node at `address` with incarnation `uid`.
    pub fn bind(&self, address: &Address, uid: Uid) {
        self.state.lock().uids.insert(address.clone(), uid);
    }

    /// Take the node down: associations to it fail.
    pub fn unbind(&self, address: &Address) {
        self.state.lock().uids.remove(address);
    }

    /// Replace the node at `address` by a new incarnation.
    ///
    /// Traffic queued for the old incarnation is lost and every association
    /// to it is reported as closed to its peers.
    pub fn restart(&self, address: &Address, uid: Uid) {
        let mut state = self.state.lock();
        state.uids.insert(address.clone(), uid);
        state.queue.retain(|(dest, _)| dest != address);
        let (dead, alive): (Vec<_>, Vec<_>) = state
            .pipes
            .drain(..)
            .partition(|(_, owner, peer)| owner == address || peer == address);
        state.pipes = alive;
        for (handle, owner, _) in dead {
            if owner != *address {
                state.queue.push_back((
                    owner,
                    Delivery::Disassociated {
                        handle,
                        info: DisassociateInfo::Unknown,
                    },
                ));
            }
        }
    }

    /// Break every connection of `owner` without the peers noticing.
    ///
    /// Only `owner` is told its associations closed; the peers keep reading
    /// from a connection that stays silent.
    pub fn sever(&self, owner: &Address) {
        let mut state = self.state.lock();
        let (dead, alive): (Vec<_>, Vec<_>) = state
            .pipes
            .drain(..)
            .partition(|(_, end, peer)| end == owner || peer == owner);
        state.pipes = alive;
        for (handle, end, _) in dead {
            state.severed.insert(handle);
            if end == *owner {
                state.queue.push_back((
                    end,
                    Delivery::Disassociated {
                        handle,
                        info: DisassociateInfo::Unknown,
                    },
                ));
            }
        }
    }

    fn is_severed(&self, handle: HandleId) -> bool {
        self.state.lock().severed.contains(&handle)
    }

    /// Lose the next `count` frames sent to `to`.
    pub fn drop_next_frames(&self, to: &Address, count: usize) {
        self.state.lock().drop_next.insert(to.clone(), count);
    }

    pub fn frames_sent_to(&self, to: &Address) -> usize {
        self.state.lock().frames_sent.get(to).copied().unwrap_or(0)
    }

    /// Discard everything queued for `to`.
    pub fn purge(&self, to: &Address) {
        self.state.lock().queue.retain(|(dest, _)| dest != to);
    }

    fn push(&self, to: &Address, delivery: Delivery) {
        self.state.lock().queue.push_back((to.clone(), delivery));
    }

    fn send_frame(&self, to: &Address, handle: HandleId, frame: Frame) {
        let mut state = self.state.lock();
        *state.frames_sent.entry(to.clone()).or_default() += 1;
        if let Some(remaining) = state.drop_next.get_mut(to) {
            if *remaining > 0 {
                *remaining -= 1;
                return;
            }
        }
        state.queue.push_back((to.clone(), Delivery::Frame { handle, frame }));
    }

    /// Deliver queued traffic until the network is quiet.
    pub fn pump(self: &Arc<Self>, nodes: &mut [&mut EndpointManager]) {
        for _ in 0..10_000 {
            let next = self.state.lock().queue.pop_front();
            let Some((to, delivery)) = next else {
                return;
            };
            let Some(node) = nodes.iter_mut().find(|n| *n.local_address() == to) else {
                continue;
            };
            match delivery {
                Delivery::Connect(pending) => {
                    let result = self.connect(&to, pending.remote(), pending.refuse_uid());
                    pending.complete(result);
                    node.run_pending();
                }
                Delivery::Inbound(handle) => node.inbound_association(handle),
                Delivery::Frame { handle, frame } => node.inbound_frame(handle, frame),
                Delivery::Disassociated { handle, info } => node.disassociated(handle, info),
            }
        }
        panic!("network did not quiesce");
    }

    fn next_handle_id(&self) -> HandleId {
        HandleId(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Handshake between `local` and `remote`: the remote side is told about
    /// the inbound association before the caller can write.
    fn connect(
        self: &Arc<Self>,
        local: &Address,
        remote: &Address,
        refuse_uid: Option<Uid>,
    ) -> Result<Arc<dyn AssociationHandle>, TransportError> {
        let (remote_uid, local_uid) = {
            let state = self.state.lock();
            let remote_uid = state.uids.get(remote).copied();
            let local_uid = state.uids.get(local).copied().unwrap_or_default();
            (remote_uid, local_uid)
        };
        let Some(remote_uid) = remote_uid else {
            return Err(TransportError::AssociationFailed(
                remote.to_string(),
                "connection refused".into(),
            ));
        };
        if refuse_uid == Some(remote_uid) {
            return Err(TransportError::RefusedUid {
                remote: remote.to_string(),
                uid: remote_uid,
            });
        }

        let ours = self.next_handle_id();
        let theirs = self.next_handle_id();
        {
            let mut state = self.state.lock();
            state.pipes.push((ours, local.clone(), remote.clone()));
            state.pipes.push((theirs, remote.clone(), local.clone()));
        }
        let net = Arc::new(NetworkRef(Arc::clone(self)));
        let peer_end = Arc::new(PipeEnd {
            id: theirs,
            peer: ours,
            local: remote.clone(),
            remote: local.clone(),
            remote_uid: local_uid,
            closed: AtomicBool::new(false),
            network: Arc::clone(&net),
        });
        self.push(remote, Delivery::Inbound(peer_end));
        Ok(Arc::new(PipeEnd {
            id: ours,
            peer: theirs,
            local: local.clone(),
            remote: remote.clone(),
            remote_uid,
            closed: AtomicBool::new(false),
            network: net,
        }))
    }
}

/// One side of an in-memory association.
#[derive(Debug)]
pub struct PipeEnd {
    id: HandleId,
    peer: HandleId,
    local: Address,
    remote: Address,
    remote_uid: Uid,
    closed: AtomicBool,
    network: Arc<NetworkRef>,
}

/// `Debug` wrapper so handles can hold the network.
pub struct NetworkRef(Arc<Network>);

impl std::fmt::Debug for NetworkRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Network")
    }
}

impl AssociationHandle for PipeEnd {
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
        self.remote_uid
    }

    fn write(&self, frame: &Frame) -> bool {
        if !self.closed.load(Ordering::SeqCst) && !self.network.0.is_severed(self.id) {
            self.network.0.send_frame(&self.remote, self.peer, frame.clone());
        }
        true
    }

    fn disassociate(&self, info: DisassociateInfo) {
        if !self.closed.swap(true, Ordering::SeqCst) && !self.network.0.is_severed(self.id) {
            self.network.0.push(
                &self.remote,
                Delivery::Disassociated {
                    handle: self.peer,
                    info,
                },
            );
        }
    }
}

/// Transport of one node on the in-memory network.
pub struct NetTransport {
    local: Address,
    network: Arc<Network>,
}

impl NetTransport {
    pub fn new(local: Address, network: &Arc<Network>) -> Arc<Self> {
        Arc::new(Self {
            local,
            network: Arc::clone(network),
        })
    }
}

impl Transport for NetTransport {
    fn local_address(&self) -> &Address {
        &self.local
    }

    fn associate(&self, pending: PendingAssociation) {
        self.network.push(&self.local, Delivery::Connect(pending));
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// One actor system on the network.
pub struct Node {
    pub address: Address,
    pub uid: Uid,
    pub manager: EndpointManager,
    pub inbox: Arc<Inbox>,
    pub events: Arc<EventLog>,
}

impl Node {
    pub fn start(
        address: Address,
        uid: Uid,
        network: &Arc<Network>,
        codec: &Arc<SharedCodec>,
        clock: &Arc<ManualClock>,
        config: RemotingConfig,
    ) -> Self {
        network.bind(&address, uid);
        let inbox = Arc::new(Inbox::default());
        let events = Arc::new(EventLog::default());
        let manager = EndpointManager::builder(
            NetTransport::new(address.clone(), network),
            codec.clone(),
            inbox.clone(),
        )
        .config(config)
        .clock(clock.clone())
        .publisher(events.clone())
        .build()
        .expect("valid config");
        Self {
            address,
            uid,
            manager,
            inbox,
            events,
        }
    }
}

/// Two nodes sharing a clock, codec and network.
pub struct Pair {
    pub network: Arc<Network>,
    pub clock: Arc<ManualClock>,
    pub codec: Arc<SharedCodec>,
    pub a: Node,
    pub b: Node,
}

impl Pair {
    pub fn new(config: RemotingConfig) -> Self {
        let network = Network::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let codec = Arc::new(SharedCodec::default());
        let a = Node::start(addr("a", 2552), 101, &network, &codec, &clock, config.clone());
        let b = Node::start(addr("b", 2553), 202, &network, &codec, &clock, config);
        Self {
            network,
            clock,
            codec,
            a,
            b,
        }
    }

    pub fn pump(&mut self) {
        self.network.pump(&mut [&mut self.a.manager, &mut self.b.manager]);
    }

    /// Advance the clock, tick both nodes and deliver the traffic.
    pub fn advance(&mut self, by: Duration) {
        self.clock.advance(by);
        self.a.manager.tick();
        self.b.manager.tick();
        self.pump();
    }
}
