// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint manager: owner of every endpoint of the local node.
//!
//! # Architecture
//!
//! ```text
//!   transport / callers
//!          |  ManagerCommand
//!          v
//!   +-------------------------------------------------------------+
//!   | EndpointManager            mailbox (FIFO)                   |
//!   |                                                             |
//!   |  EndpointRegistry    supervisors   writers   readers        |
//!   |  (policies)          (writable)    (all)     (per handle)   |
//!   +-------------------------------------------------------------+
//! ```
//!
//! Supervisors, writers and readers are plain state machines returning
//! effects. The manager applies the effects: it creates and stops machines,
//! calls the transport and queues messages between machines in its mailbox.
//! Everything runs on the thread calling [`EndpointManager::run_pending`] and
//! [`EndpointManager::tick`]; [`RemotingRuntime`](crate::RemotingRuntime)
//! provides such a thread.
//!
//! Outbound association attempts never block that thread: the transport gets
//! a [`PendingAssociation`] and completes it later with
//! [`ManagerCommand::AssociationResult`]. Completions go to the
//! [`CommandSink`] of the manager, an internal queue drained by
//! `run_pending` unless replaced with [`EndpointManager::set_command_sink`].
//!
//! # Failure Handling
//!
//! | Escalated failure | Registry outcome |
//! |-------------------|------------------|
//! | `InvalidAssociation`, `Shutdown` | gated, or kept quarantined |
//! | `Hopeless` with uid | quarantined |
//! | `Hopeless` without uid | gated, or kept quarantined |
//!
//! The failing endpoint is stopped in every case. Transient failures never
//! reach the manager for writable endpoints (the supervisor gates itself).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};

use super::codec::{Codec, DeadLetterReason, Dispatcher, Frame};
use super::context::EndpointContext;
use super::envelope::{EndpointId, HandleId, OutboundEnvelope};
use super::events::{EventPublisher, LifecycleEvent, LogEventPublisher};
use super::failure::AssociationFailure;
use super::policy::EndpointPolicy;
use super::reader::{EndpointReader, ReaderEffect};
use super::receive_store::{Link, ReceiveBufferStore};
use super::registry::EndpointRegistry;
use super::supervisor::{ReliableDeliverySupervisor, SupervisorCommand, SupervisorEffect, SupervisorState};
use super::transport::{
    AssociationHandle, CommandSink, DisassociateInfo, PendingAssociation, Transport,
};
use super::writer::{EndpointWriter, WriterCommand, WriterEffect, WriterNotice, WriterState};
use crate::address::{Address, Uid};
use crate::clock::{Clock, MonotonicClock};
use crate::config::RemotingConfig;
use crate::error::{ConfigError, TransportError};
use crate::metrics::RemotingMetrics;
use crate::reliability::{HasSeqNo, SeqNo, Sequenced};

/// Input of the endpoint manager.
#[derive(Debug)]
pub enum ManagerCommand {
    /// Route a message to its remote address.
    Send(OutboundEnvelope),
    /// Refuse an incarnation of `address`; without `uid` the address is gated.
    Quarantine { address: Address, uid: Option<Uid> },
    /// The transport accepted and handshook an inbound connection.
    InboundAssociation(Arc<dyn AssociationHandle>),
    /// A frame arrived on `handle`.
    InboundFrame { handle: HandleId, frame: Frame },
    /// The remote side closed `handle`.
    Disassociated { handle: HandleId, info: DisassociateInfo },
    /// Outcome of an outbound association attempt, see [`PendingAssociation`].
    AssociationResult {
        endpoint: EndpointId,
        attempt: u64,
        result: Result<Arc<dyn AssociationHandle>, TransportError>,
    },
    /// Drop expired gate and quarantine entries now.
    Prune,
    /// Flush every endpoint and stop.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerState {
    Accepting,
    /// Shutdown requested; endpoints are flushing.
    Flushing,
    ShutDown,
}

/// Point-in-time view of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSnapshot {
    pub endpoint: EndpointId,
    pub remote: Address,
    /// Writable endpoints own a reliable delivery supervisor.
    pub writable: bool,
    pub supervisor_state: Option<SupervisorState>,
    pub writer_state: Option<WriterState>,
    pub uid: Option<Uid>,
    pub uid_confirmed: bool,
    /// Unacknowledged system messages in the resend buffer.
    pub non_acked: Vec<SeqNo>,
    pub nacked: Vec<SeqNo>,
    /// Messages waiting in the writer buffers.
    pub writer_buffered: usize,
}

#[derive(Debug)]
enum Mail {
    External(ManagerCommand),
    Supervisor(EndpointId, SupervisorCommand),
    Writer(EndpointId, WriterCommand),
    Associate {
        endpoint: EndpointId,
        remote: Address,
        refuse_uid: Option<Uid>,
    },
    StoppedReading(EndpointId),
    TookOver {
        endpoint: EndpointId,
        handle: HandleId,
    },
    GotUid {
        endpoint: EndpointId,
        uid: Uid,
        remote: Address,
    },
    Idle(EndpointId),
}

/// Default [`CommandSink`]: the manager drains it in `run_pending`.
struct CompletionQueue(Sender<ManagerCommand>);

impl CommandSink for CompletionQueue {
    fn submit_command(&self, command: ManagerCommand) {
        // The receiver lives as long as the manager
        let _ = self.0.send(command);
    }
}

/// Builder for [`EndpointManager`].
///
/// # Example
///
/// ```ignore
/// let mut manager = EndpointManager::builder(transport, codec, dispatcher)
///     .config(RemotingConfig::default())
///     .publisher(Arc::new(LogEventPublisher))
///     .build()?;
/// manager.send(envelope);
/// ```
pub struct EndpointManagerBuilder {
    config: RemotingConfig,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    dispatcher: Arc<dyn Dispatcher>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    metrics: Arc<RemotingMetrics>,
    receive_buffers: Arc<ReceiveBufferStore>,
}

impl EndpointManagerBuilder {
    #[must_use]
    pub fn config(mut self, config: RemotingConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<RemotingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Share receive buffers with another manager of the same process.
    #[must_use]
    pub fn receive_buffers(mut self, store: Arc<ReceiveBufferStore>) -> Self {
        self.receive_buffers = store;
        self
    }

    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] when the configuration does not validate.
    pub fn build(self) -> Result<EndpointManager, ConfigError> {
        self.config.validate()?;
        let local_address = self.transport.local_address().clone();
        let next_prune_at = self.clock.deadline_after(self.config.prune_interval);
        let ctx = EndpointContext {
            local_address: local_address.clone(),
            config: Arc::new(self.config),
            clock: self.clock,
            codec: self.codec,
            dispatcher: self.dispatcher,
            metrics: self.metrics,
            receive_buffers: self.receive_buffers,
        };
        log::info!(
            "[EndpointManager::build] Remoting started; listening on address: [{}]",
            local_address
        );
        self.publisher.publish(&LifecycleEvent::RemotingListen {
            local: local_address,
        });
        let (completion_tx, completions) = channel::unbounded();
        let completion_queue: Arc<dyn CommandSink> = Arc::new(CompletionQueue(completion_tx));
        Ok(EndpointManager {
            ctx,
            transport: self.transport,
            publisher: self.publisher,
            registry: EndpointRegistry::new(),
            supervisors: HashMap::new(),
            writers: HashMap::new(),
            readers: HashMap::new(),
            awaiting_reader: HashMap::new(),
            pending_read_handoffs: HashMap::new(),
            stashed_inbound: HashMap::new(),
            mailbox: VecDeque::new(),
            command_sink: Arc::clone(&completion_queue),
            completion_queue,
            completions,
            associating: HashMap::new(),
            next_association_attempt: 1,
            next_endpoint_id: 1,
            next_prune_at,
            state: ManagerState::Accepting,
        })
    }
}

/// Endpoint manager of one local node.
pub struct EndpointManager {
    ctx: EndpointContext,
    transport: Arc<dyn Transport>,
    publisher: Arc<dyn EventPublisher>,
    registry: EndpointRegistry,
    supervisors: HashMap<EndpointId, ReliableDeliverySupervisor>,
    writers: HashMap<EndpointId, EndpointWriter>,
    readers: HashMap<HandleId, EndpointReader>,
    /// Frames of inbound handles whose reader is not started yet.
    awaiting_reader: HashMap<HandleId, Vec<Frame>>,
    /// Inbound handle waiting for an endpoint to stop reading or take over.
    pending_read_handoffs: HashMap<EndpointId, Arc<dyn AssociationHandle>>,
    /// Inbound handles waiting for an endpoint to confirm its uid or go idle.
    stashed_inbound: HashMap<EndpointId, Vec<Arc<dyn AssociationHandle>>>,
    mailbox: VecDeque<Mail>,
    command_sink: Arc<dyn CommandSink>,
    completion_queue: Arc<dyn CommandSink>,
    completions: Receiver<ManagerCommand>,
    /// Latest association attempt of each endpoint; older results are stale.
    associating: HashMap<EndpointId, u64>,
    next_association_attempt: u64,
    next_endpoint_id: u64,
    next_prune_at: u64,
    state: ManagerState,
}

impl EndpointManager {
    /// Builder with the default configuration, a monotonic clock and a
    /// logging event publisher.
    #[must_use]
    pub fn builder(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> EndpointManagerBuilder {
        EndpointManagerBuilder {
            config: RemotingConfig::default(),
            transport,
            codec,
            dispatcher,
            publisher: Arc::new(LogEventPublisher),
            clock: Arc::new(MonotonicClock::new()),
            metrics: Arc::new(RemotingMetrics::new()),
            receive_buffers: Arc::new(ReceiveBufferStore::new()),
        }
    }

    // ------------------------------------------------------------------
    // Public API
    // ------------------------------------------------------------------

    /// Queue a command without processing it.
    pub fn submit(&mut self, command: ManagerCommand) {
        self.mailbox.push_back(Mail::External(command));
    }

    /// Process the mailbox and the queued association completions until
    /// both are empty.
    pub fn run_pending(&mut self) {
        loop {
            while let Some(mail) = self.mailbox.pop_front() {
                self.process(mail);
            }
            match self.completions.try_recv() {
                Ok(command) => self.mailbox.push_back(Mail::External(command)),
                Err(_) => break,
            }
        }
        self.check_shutdown_complete();
    }

    /// Route association completions through `sink`; `None` restores the
    /// internal queue. Attempts already started complete through the sink
    /// they were given.
    pub fn set_command_sink(&mut self, sink: Option<Arc<dyn CommandSink>>) {
        self.command_sink = sink.unwrap_or_else(|| Arc::clone(&self.completion_queue));
    }

    /// Outbound association attempts not completed yet.
    #[must_use]
    pub fn associations_in_flight(&self) -> usize {
        self.associating.len()
    }

    /// Fire due timers of every endpoint, prune the registry when due, then
    /// process the mailbox.
    pub fn tick(&mut self) {
        let now = self.ctx.now_ms();
        if now >= self.next_prune_at {
            self.registry.prune(now);
            self.next_prune_at = self.ctx.clock.deadline_after(self.ctx.config.prune_interval);
        }

        let mut ids: Vec<EndpointId> = self.supervisors.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(supervisor) = self.supervisors.get_mut(&id) {
                let effects = supervisor.tick(now);
                self.apply_supervisor_effects(id, effects);
            }
        }

        let mut ids: Vec<EndpointId> = self.writers.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(writer) = self.writers.get_mut(&id) {
                let effects = writer.tick(now);
                self.apply_writer_effects(id, effects);
            }
        }
        self.run_pending();
    }

    pub fn send(&mut self, envelope: OutboundEnvelope) {
        self.submit(ManagerCommand::Send(envelope));
        self.run_pending();
    }

    pub fn quarantine(&mut self, address: Address, uid: Option<Uid>) {
        self.submit(ManagerCommand::Quarantine { address, uid });
        self.run_pending();
    }

    pub fn inbound_association(&mut self, handle: Arc<dyn AssociationHandle>) {
        self.submit(ManagerCommand::InboundAssociation(handle));
        self.run_pending();
    }

    pub fn inbound_frame(&mut self, handle: HandleId, frame: Frame) {
        self.submit(ManagerCommand::InboundFrame { handle, frame });
        self.run_pending();
    }

    pub fn disassociated(&mut self, handle: HandleId, info: DisassociateInfo) {
        self.submit(ManagerCommand::Disassociated { handle, info });
        self.run_pending();
    }

    pub fn shutdown(&mut self) {
        self.submit(ManagerCommand::Shutdown);
        self.run_pending();
    }

    #[must_use]
    pub fn state(&self) -> ManagerState {
        self.state
    }

    #[must_use]
    pub fn local_address(&self) -> &Address {
        &self.ctx.local_address
    }

    #[must_use]
    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<RemotingMetrics> {
        Arc::clone(&self.ctx.metrics)
    }

    #[must_use]
    pub fn receive_buffers(&self) -> Arc<ReceiveBufferStore> {
        Arc::clone(&self.ctx.receive_buffers)
    }

    #[must_use]
    pub fn policy_for(&self, address: &Address) -> Option<EndpointPolicy> {
        self.registry.writable_endpoint_with_policy_for(address).cloned()
    }

    /// Live endpoints, writable and read-only.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        let read_only = self
            .writers
            .keys()
            .filter(|id| !self.supervisors.contains_key(id))
            .count();
        self.supervisors.len() + read_only
    }

    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    #[must_use]
    pub fn pending_handoffs(&self) -> usize {
        self.pending_read_handoffs.len()
    }

    /// Snapshot of the writable endpoint of `address`.
    #[must_use]
    pub fn writable_snapshot(&self, address: &Address) -> Option<EndpointSnapshot> {
        let endpoint = self
            .registry
            .writable_endpoint_with_policy_for(address)?
            .endpoint()?;
        self.snapshot(endpoint)
    }

    /// Snapshot of the read-only endpoint of `address`.
    #[must_use]
    pub fn read_only_snapshot(&self, address: &Address) -> Option<EndpointSnapshot> {
        let (endpoint, _) = self.registry.read_only_endpoint_for(address)?;
        self.snapshot(endpoint)
    }

    #[must_use]
    pub fn snapshot(&self, endpoint: EndpointId) -> Option<EndpointSnapshot> {
        let supervisor = self.supervisors.get(&endpoint);
        let writer = self.writers.get(&endpoint);
        let remote = supervisor
            .map(|s| s.remote().clone())
            .or_else(|| writer.map(|w| w.remote().clone()))?;
        let seqs = |messages: &[Sequenced<OutboundEnvelope>]| {
            messages.iter().map(HasSeqNo::seq).collect::<Vec<SeqNo>>()
        };
        Some(EndpointSnapshot {
            endpoint,
            remote,
            writable: supervisor.is_some(),
            supervisor_state: supervisor.map(ReliableDeliverySupervisor::state),
            writer_state: writer.map(EndpointWriter::state),
            uid: supervisor
                .and_then(ReliableDeliverySupervisor::uid)
                .or_else(|| writer.and_then(|w| w.handle().map(|h| h.remote_uid()))),
            uid_confirmed: supervisor.is_some_and(ReliableDeliverySupervisor::is_uid_confirmed),
            non_acked: supervisor
                .map(|s| seqs(s.resend_buffer().non_acked()))
                .unwrap_or_default(),
            nacked: supervisor
                .map(|s| seqs(s.resend_buffer().nacked()))
                .unwrap_or_default(),
            writer_buffered: writer.map_or(0, EndpointWriter::buffered_len),
        })
    }

    // ------------------------------------------------------------------
    // Mailbox
    // ------------------------------------------------------------------

    fn process(&mut self, mail: Mail) {
        match mail {
            Mail::External(command) => self.handle_external(command),
            Mail::Supervisor(id, command) => self.deliver_to_supervisor(id, command),
            Mail::Writer(id, command) => self.deliver_to_writer(id, command),
            Mail::Associate {
                endpoint,
                remote,
                refuse_uid,
            } => {
                if !self.writers.contains_key(&endpoint) {
                    return;
                }
                let attempt = self.next_association_attempt;
                self.next_association_attempt += 1;
                self.associating.insert(endpoint, attempt);
                log::debug!(
                    "[EndpointManager::process] Associating {} with {} (attempt {})",
                    endpoint,
                    remote,
                    attempt
                );
                let sink = Arc::clone(&self.command_sink);
                self.transport
                    .associate(PendingAssociation::new(endpoint, attempt, remote, refuse_uid, sink));
            }
            Mail::StoppedReading(id) => self.accept_pending_reader(id),
            Mail::TookOver { endpoint, handle } => {
                if self
                    .pending_read_handoffs
                    .get(&endpoint)
                    .is_some_and(|pending| pending.id() == handle)
                {
                    self.pending_read_handoffs.remove(&endpoint);
                }
            }
            Mail::GotUid {
                endpoint,
                uid,
                remote,
            } => self.got_uid(endpoint, uid, &remote),
            Mail::Idle(id) => self.handle_stashed_inbound(id, true),
        }
    }

    fn handle_external(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Send(envelope) => self.route_send(envelope),
            ManagerCommand::Quarantine { address, uid } => self.handle_quarantine(&address, uid),
            ManagerCommand::InboundAssociation(handle) => {
                if self.state == ManagerState::Accepting {
                    self.handle_inbound_association(handle, false);
                } else {
                    handle.disassociate(DisassociateInfo::Shutdown);
                }
            }
            ManagerCommand::InboundFrame { handle, frame } => self.handle_inbound_frame(handle, frame),
            ManagerCommand::Disassociated { handle, info } => self.handle_disassociated(handle, info),
            ManagerCommand::AssociationResult {
                endpoint,
                attempt,
                result,
            } => self.association_result(endpoint, attempt, result),
            ManagerCommand::Prune => self.registry.prune(self.ctx.now_ms()),
            ManagerCommand::Shutdown => self.begin_shutdown(),
        }
    }

    fn association_result(
        &mut self,
        endpoint: EndpointId,
        attempt: u64,
        result: Result<Arc<dyn AssociationHandle>, TransportError>,
    ) {
        if self.associating.get(&endpoint) == Some(&attempt) {
            self.associating.remove(&endpoint);
            self.deliver_to_writer(endpoint, WriterCommand::Associated(result));
            return;
        }
        log::debug!(
            "[EndpointManager::association_result] Discarding stale attempt {} of {}",
            attempt,
            endpoint
        );
        if let Ok(handle) = result {
            handle.disassociate(DisassociateInfo::Unknown);
        }
    }

    fn deliver_to_supervisor(&mut self, id: EndpointId, command: SupervisorCommand) {
        match self.supervisors.get_mut(&id) {
            Some(supervisor) => {
                let effects = supervisor.handle_command(command);
                self.apply_supervisor_effects(id, effects);
            }
            None => {
                if let SupervisorCommand::Send(envelope) = command {
                    self.dead_letter(&envelope, DeadLetterReason::EndpointStopped);
                }
            }
        }
    }

    fn deliver_to_writer(&mut self, id: EndpointId, command: WriterCommand) {
        if let WriterCommand::TakeOver(handle) = &command {
            let current = self.pending_read_handoffs.get(&id).map(|h| h.id());
            if current != Some(handle.id()) {
                log::debug!(
                    "[EndpointManager::deliver_to_writer] Skipping superseded takeover of {} by {}",
                    id,
                    handle.id()
                );
                return;
            }
        }
        match self.writers.get_mut(&id) {
            Some(writer) => {
                let effects = writer.handle_command(command);
                self.apply_writer_effects(id, effects);
            }
            None => match command {
                WriterCommand::Send(message) if message.seq.is_none() => {
                    self.dead_letter(&message.envelope, DeadLetterReason::EndpointStopped);
                }
                WriterCommand::Associated(Ok(handle)) => {
                    handle.disassociate(DisassociateInfo::Unknown);
                }
                // The endpoint is gone: the pending handle starts its own endpoint
                WriterCommand::TakeOver(_) => self.accept_pending_reader(id),
                _ => {}
            },
        }
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    fn apply_supervisor_effects(&mut self, id: EndpointId, effects: Vec<SupervisorEffect>) {
        for effect in effects {
            match effect {
                SupervisorEffect::SpawnWriter { handle, refuse_uid } => {
                    if let Some(remote) = self.supervisors.get(&id).map(|s| s.remote().clone()) {
                        self.spawn_writer(id, remote, handle, refuse_uid, true);
                    }
                }
                SupervisorEffect::StopWriter(info) => self.stop_writer(id, info),
                SupervisorEffect::ToWriter(command) => {
                    self.mailbox.push_back(Mail::Writer(id, command));
                }
                SupervisorEffect::GotUid { uid, remote } => {
                    self.mailbox.push_back(Mail::GotUid {
                        endpoint: id,
                        uid,
                        remote,
                    });
                }
                SupervisorEffect::Idle => self.mailbox.push_back(Mail::Idle(id)),
                SupervisorEffect::StoppedReading => {
                    self.mailbox.push_back(Mail::StoppedReading(id));
                }
                SupervisorEffect::DeadLetter(envelope, reason) => self.dead_letter(&envelope, reason),
                SupervisorEffect::Escalate(failure) => {
                    if let Some(remote) = self.supervisors.get(&id).map(|s| s.remote().clone()) {
                        self.on_endpoint_failure(id, &remote, &failure);
                        self.stop_endpoint(id, stop_reason(&failure));
                    }
                }
                SupervisorEffect::Stopped => self.on_supervisor_stopped(id),
            }
        }
    }

    fn apply_writer_effects(&mut self, id: EndpointId, effects: Vec<WriterEffect>) {
        for effect in effects {
            match effect {
                WriterEffect::Associate { refuse_uid } => {
                    if let Some(remote) = self.writers.get(&id).map(|w| w.remote().clone()) {
                        self.mailbox.push_back(Mail::Associate {
                            endpoint: id,
                            remote,
                            refuse_uid,
                        });
                    }
                }
                WriterEffect::StartReader(handle) => self.start_reader(id, handle),
                WriterEffect::StopReader(handle) => {
                    if let Some(mut reader) = self.readers.remove(&handle) {
                        let owner = reader.owner();
                        let effects = reader.stop();
                        self.apply_reader_effects(owner, effects);
                    }
                }
                WriterEffect::StopReaderReading(handle) => {
                    if let Some(reader) = self.readers.get_mut(&handle) {
                        reader.stop_reading();
                    }
                }
                WriterEffect::Notify(notice) => self.writer_notice(id, notice),
                WriterEffect::StoppedReading => self.mailbox.push_back(Mail::StoppedReading(id)),
                WriterEffect::TookOver(handle) => {
                    self.mailbox.push_back(Mail::TookOver {
                        endpoint: id,
                        handle,
                    });
                }
                WriterEffect::DeadLetter(envelope, reason) => self.dead_letter(&envelope, reason),
                WriterEffect::Publish(event) => self.publisher.publish(&event),
                WriterEffect::Continue => {
                    self.mailbox
                        .push_back(Mail::Writer(id, WriterCommand::BackoffTimer));
                }
            }
        }
    }

    fn apply_reader_effects(&mut self, owner: EndpointId, effects: Vec<ReaderEffect>) {
        for effect in effects {
            match effect {
                ReaderEffect::AckReceived(ack) => {
                    self.mailbox
                        .push_back(Mail::Supervisor(owner, SupervisorCommand::Ack(ack)));
                }
                ReaderEffect::OutboundAck(ack) => {
                    self.mailbox
                        .push_back(Mail::Writer(owner, WriterCommand::OutboundAck(ack)));
                }
                ReaderEffect::Stopped { handle, failure } => {
                    self.readers.remove(&handle);
                    self.mailbox.push_back(Mail::Writer(
                        owner,
                        WriterCommand::ReaderTerminated { handle, failure },
                    ));
                }
            }
        }
    }

    fn writer_notice(&mut self, id: EndpointId, notice: WriterNotice) {
        match notice {
            WriterNotice::GotUid { uid, remote } => {
                if self.supervisors.contains_key(&id) {
                    self.mailbox
                        .push_back(Mail::Supervisor(id, SupervisorCommand::GotUid { uid, remote }));
                }
            }
            WriterNotice::Terminated(failure) => {
                let writer = self.writers.remove(&id);
                if self.supervisors.contains_key(&id) {
                    self.mailbox
                        .push_back(Mail::Supervisor(id, SupervisorCommand::WriterTerminated(failure)));
                    return;
                }
                // Read-only endpoint: the writer is the whole endpoint
                if let (Some(failure), Some(writer)) = (failure, writer) {
                    let remote = writer.remote().clone();
                    self.on_endpoint_failure(id, &remote, &failure);
                }
                self.on_endpoint_terminated(id);
            }
        }
    }

    fn spawn_writer(
        &mut self,
        id: EndpointId,
        remote: Address,
        handle: Option<Arc<dyn AssociationHandle>>,
        refuse_uid: Option<Uid>,
        reliable_delivery: bool,
    ) {
        let (writer, effects) = EndpointWriter::new(
            self.ctx.clone(),
            id,
            remote,
            handle,
            refuse_uid,
            reliable_delivery,
        );
        if self.writers.insert(id, writer).is_some() {
            log::warn!(
                "[EndpointManager::spawn_writer] Replaced a running writer of {}",
                id
            );
        }
        self.apply_writer_effects(id, effects);
    }

    fn stop_writer(&mut self, id: EndpointId, info: DisassociateInfo) {
        if let Some(writer) = self.writers.get_mut(&id) {
            let effects = writer.stop_with(info);
            self.apply_writer_effects(id, effects);
        }
    }

    fn start_reader(&mut self, owner: EndpointId, handle: Arc<dyn AssociationHandle>) {
        let handle_id = handle.id();
        let reliable_delivery = self.supervisors.contains_key(&owner);
        let mut reader = EndpointReader::new(self.ctx.clone(), owner, handle, reliable_delivery);
        let mut effects = reader.start();
        for frame in self.awaiting_reader.remove(&handle_id).unwrap_or_default() {
            effects.extend(reader.receive_frame(&frame));
        }
        self.readers.insert(handle_id, reader);
        self.apply_reader_effects(owner, effects);
    }

    fn dead_letter(&self, envelope: &OutboundEnvelope, reason: DeadLetterReason) {
        self.ctx.metrics.increment_dead_letters();
        log::debug!(
            "[EndpointManager::dead_letter] Message to {} dropped: {}",
            envelope.recipient,
            reason
        );
        self.ctx.dispatcher.dead_letter(envelope, reason);
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    fn route_send(&mut self, envelope: OutboundEnvelope) {
        if self.state != ManagerState::Accepting {
            self.dead_letter(&envelope, DeadLetterReason::ShuttingDown);
            return;
        }
        let address = envelope.remote_address().clone();
        let policy = self.registry.writable_endpoint_with_policy_for(&address).cloned();
        let endpoint = match policy {
            Some(EndpointPolicy::Pass { endpoint, .. }) => endpoint,
            Some(EndpointPolicy::Gated { until }) => {
                if self.ctx.clock.is_overdue(until) {
                    self.create_and_register_writing_endpoint(&address)
                } else {
                    self.dead_letter(&envelope, DeadLetterReason::Gated);
                    return;
                }
            }
            // A quarantined address may come back with a new incarnation
            Some(EndpointPolicy::Quarantined { .. }) | None => {
                self.create_and_register_writing_endpoint(&address)
            }
        };
        self.mailbox
            .push_back(Mail::Supervisor(endpoint, SupervisorCommand::Send(envelope)));
    }

    fn create_and_register_writing_endpoint(&mut self, address: &Address) -> EndpointId {
        let id = self.next_id();
        let refuse_uid = self.registry.refuse_uid(address);
        log::debug!(
            "[EndpointManager::create_and_register_writing_endpoint] {} for {} (refusing uid {:?})",
            id,
            address,
            refuse_uid
        );
        let (supervisor, effects) =
            ReliableDeliverySupervisor::new(self.ctx.clone(), id, address.clone(), None, refuse_uid);
        self.supervisors.insert(id, supervisor);
        self.registry.register_writable_endpoint(address, None, id);
        self.apply_supervisor_effects(id, effects);
        id
    }

    fn next_id(&mut self) -> EndpointId {
        let id = EndpointId(self.next_endpoint_id);
        self.next_endpoint_id += 1;
        id
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    fn handle_inbound_frame(&mut self, handle: HandleId, frame: Frame) {
        if let Some(reader) = self.readers.get_mut(&handle) {
            let owner = reader.owner();
            let effects = reader.receive_frame(&frame);
            self.apply_reader_effects(owner, effects);
        } else if let Some(parked) = self.awaiting_reader.get_mut(&handle) {
            parked.push(frame);
        } else {
            log::trace!(
                "[EndpointManager::handle_inbound_frame] Dropping frame of unknown {}",
                handle
            );
        }
    }

    fn handle_disassociated(&mut self, handle: HandleId, info: DisassociateInfo) {
        if let Some(reader) = self.readers.get_mut(&handle) {
            let owner = reader.owner();
            let effects = reader.disassociated(info);
            self.apply_reader_effects(owner, effects);
            return;
        }
        self.awaiting_reader.remove(&handle);
        self.pending_read_handoffs
            .retain(|_, pending| pending.id() != handle);
        for stash in self.stashed_inbound.values_mut() {
            stash.retain(|stashed| stashed.id() != handle);
        }
    }

    fn handle_inbound_association(&mut self, handle: Arc<dyn AssociationHandle>, writer_is_idle: bool) {
        let remote = handle.remote_address().clone();
        let uid = handle.remote_uid();
        self.awaiting_reader.entry(handle.id()).or_default();

        if let Some((endpoint, _)) = self.registry.read_only_endpoint_for(&remote) {
            self.replace_pending_handoff(endpoint, Arc::clone(&handle));
            self.mailbox
                .push_back(Mail::Writer(endpoint, WriterCommand::TakeOver(handle)));
            let writable = self
                .registry
                .writable_endpoint_with_policy_for(&remote)
                .and_then(EndpointPolicy::endpoint);
            if let Some(writable) = writable {
                self.mailbox
                    .push_back(Mail::Supervisor(writable, SupervisorCommand::Ungate));
            }
            return;
        }

        if self.registry.is_quarantined(&remote, uid) {
            log::warn!(
                "[EndpointManager::handle_inbound_association] Refusing inbound association of quarantined {} (uid {})",
                remote,
                uid
            );
            self.awaiting_reader.remove(&handle.id());
            handle.disassociate(DisassociateInfo::Quarantined);
            return;
        }

        match self.registry.writable_endpoint_with_policy_for(&remote).cloned() {
            Some(EndpointPolicy::Pass {
                endpoint,
                uid: None,
            }) => {
                // Uid not confirmed yet: wait for the handshake or for idleness
                if writer_is_idle {
                    self.create_and_register_endpoint(handle);
                } else {
                    self.mailbox
                        .push_back(Mail::Supervisor(endpoint, SupervisorCommand::IsIdle));
                    self.stashed_inbound.entry(endpoint).or_default().push(handle);
                }
            }
            Some(EndpointPolicy::Pass {
                endpoint,
                uid: Some(confirmed),
            }) => {
                if confirmed == uid {
                    self.replace_pending_handoff(endpoint, handle);
                    self.mailbox
                        .push_back(Mail::Supervisor(endpoint, SupervisorCommand::StopReading));
                    self.mailbox
                        .push_back(Mail::Supervisor(endpoint, SupervisorCommand::Ungate));
                } else {
                    log::info!(
                        "[EndpointManager::handle_inbound_association] {} restarted (uid {} -> {}), replacing its endpoint",
                        remote,
                        confirmed,
                        uid
                    );
                    if let Some(stale) = self.pending_read_handoffs.remove(&endpoint) {
                        stale.disassociate(DisassociateInfo::Unknown);
                        self.awaiting_reader.remove(&stale.id());
                    }
                    self.stop_endpoint(endpoint, DisassociateInfo::Quarantined);
                    self.quarantine_uid(&remote, confirmed);
                    self.create_and_register_endpoint(handle);
                }
            }
            _ => self.create_and_register_endpoint(handle),
        }
    }

    fn replace_pending_handoff(&mut self, endpoint: EndpointId, handle: Arc<dyn AssociationHandle>) {
        let handle_id = handle.id();
        if let Some(previous) = self.pending_read_handoffs.insert(endpoint, handle) {
            if previous.id() != handle_id {
                log::debug!(
                    "[EndpointManager::replace_pending_handoff] {} superseded by {}",
                    previous.id(),
                    handle_id
                );
                previous.disassociate(DisassociateInfo::Unknown);
                self.awaiting_reader.remove(&previous.id());
            }
        }
    }

    fn create_and_register_endpoint(&mut self, handle: Arc<dyn AssociationHandle>) {
        let remote = handle.remote_address().clone();
        let uid = handle.remote_uid();
        let has_writable = self.registry.has_writable_endpoint_for(&remote);
        let writing = self.ctx.config.use_passive_connections && !has_writable;
        self.publisher.publish(&LifecycleEvent::Associated {
            local: self.ctx.local_address.clone(),
            remote: remote.clone(),
            inbound: true,
        });

        let id = self.next_id();
        if writing {
            let refuse_uid = self.registry.refuse_uid(&remote);
            let (supervisor, effects) = ReliableDeliverySupervisor::new(
                self.ctx.clone(),
                id,
                remote.clone(),
                Some(handle),
                refuse_uid,
            );
            self.supervisors.insert(id, supervisor);
            self.registry.register_writable_endpoint(&remote, Some(uid), id);
            self.apply_supervisor_effects(id, effects);
        } else {
            self.registry.register_read_only_endpoint(&remote, id, uid);
            if !has_writable {
                self.registry.remove_policy(&remote);
            }
            self.spawn_writer(id, remote, Some(handle), None, false);
        }
    }

    fn accept_pending_reader(&mut self, taking_over_from: EndpointId) {
        let Some(handle) = self.pending_read_handoffs.remove(&taking_over_from) else {
            return;
        };
        let remote = handle.remote_address().clone();
        let uid = handle.remote_uid();
        log::debug!(
            "[EndpointManager::accept_pending_reader] {} takes over reading from {}",
            handle.id(),
            taking_over_from
        );
        self.ctx.metrics.increment_handoffs();
        self.publisher.publish(&LifecycleEvent::Associated {
            local: self.ctx.local_address.clone(),
            remote: remote.clone(),
            inbound: true,
        });
        let id = self.next_id();
        self.registry.register_read_only_endpoint(&remote, id, uid);
        self.spawn_writer(id, remote, Some(handle), None, false);
    }

    fn handle_stashed_inbound(&mut self, endpoint: EndpointId, writer_is_idle: bool) {
        for handle in self.stashed_inbound.remove(&endpoint).unwrap_or_default() {
            self.handle_inbound_association(handle, writer_is_idle);
        }
    }

    fn got_uid(&mut self, endpoint: EndpointId, uid: Uid, remote: &Address) {
        let current = self
            .registry
            .writable_endpoint_with_policy_for(remote)
            .and_then(EndpointPolicy::endpoint);
        if current == Some(endpoint) {
            if self.registry.refuse_uid(remote) == Some(uid) {
                self.quarantine_uid(remote, uid);
                self.stop_endpoint(endpoint, DisassociateInfo::Quarantined);
            } else {
                self.registry.register_writable_endpoint_uid(remote, uid);
            }
        }
        self.handle_stashed_inbound(endpoint, false);
    }

    // ------------------------------------------------------------------
    // Failures and quarantine
    // ------------------------------------------------------------------

    fn on_endpoint_failure(&mut self, id: EndpointId, remote: &Address, failure: &AssociationFailure) {
        let gate_ms = self.ctx.config.retry_gate_closed_for.as_millis();
        let inbound = !self.supervisors.contains_key(&id);
        let level = match failure {
            AssociationFailure::InvalidAssociation { reason, info } => {
                log::warn!(
                    "[EndpointManager::on_endpoint_failure] Tried to associate with unreachable remote address [{}]. Address is now gated for {} ms, all messages to this address will be delivered to dead letters. Reason: [{}]",
                    remote,
                    gate_ms,
                    reason
                );
                if *info == Some(DisassociateInfo::Quarantined) {
                    log::error!(
                        "[EndpointManager::on_endpoint_failure] The remote system [{}] has quarantined this system. No further associations to the remote system are possible until this system is restarted.",
                        remote
                    );
                }
                self.keep_quarantined_or_gate(id, remote);
                log::Level::Warn
            }
            AssociationFailure::Shutdown => {
                log::debug!(
                    "[EndpointManager::on_endpoint_failure] Remote system with address [{}] has shut down. Address is now gated for {} ms.",
                    remote,
                    gate_ms
                );
                self.keep_quarantined_or_gate(id, remote);
                log::Level::Debug
            }
            AssociationFailure::Hopeless {
                uid: Some(uid),
                reason,
            } => {
                log::error!(
                    "[EndpointManager::on_endpoint_failure] Association to [{}] with UID [{}] irrecoverably failed. Quarantining address. {}",
                    remote,
                    uid,
                    reason
                );
                self.quarantine_uid(remote, *uid);
                log::Level::Error
            }
            AssociationFailure::Hopeless { uid: None, reason } => {
                log::warn!(
                    "[EndpointManager::on_endpoint_failure] Association to [{}] with unknown UID is irrecoverably failed. Address cannot be quarantined without knowing the UID, gating instead for {} ms. {}",
                    remote,
                    gate_ms,
                    reason
                );
                self.keep_quarantined_or_gate(id, remote);
                log::Level::Warn
            }
            AssociationFailure::Transient(reason) => {
                log::debug!(
                    "[EndpointManager::on_endpoint_failure] Read-only association with [{}] failed: {}",
                    remote,
                    reason
                );
                let until = self.gate_deadline();
                self.registry.mark_as_failed(id, until);
                log::Level::Debug
            }
        };
        self.publisher.publish(&LifecycleEvent::AssociationError {
            local: self.ctx.local_address.clone(),
            remote: remote.clone(),
            inbound,
            cause: failure.to_string(),
            level,
        });
    }

    fn keep_quarantined_or_gate(&mut self, id: EndpointId, remote: &Address) {
        match self.registry.refuse_uid(remote) {
            Some(uid) => {
                log::info!(
                    "[EndpointManager::keep_quarantined_or_gate] Quarantined address [{}] is still unreachable or has not been restarted. Keeping it quarantined.",
                    remote
                );
                let until = self.quarantine_deadline();
                self.registry.mark_as_quarantined(remote, uid, until);
            }
            None => {
                if self.registry.is_writable(id) {
                    self.ctx.metrics.increment_gates();
                }
                let until = self.gate_deadline();
                self.registry.mark_as_failed(id, until);
            }
        }
    }

    /// Quarantine `uid` of `remote` and publish it unless already done.
    fn quarantine_uid(&mut self, remote: &Address, uid: Uid) {
        let already = matches!(
            self.registry.writable_endpoint_with_policy_for(remote),
            Some(EndpointPolicy::Quarantined { uid: current, .. }) if *current == uid
        );
        let until = self.quarantine_deadline();
        self.registry.mark_as_quarantined(remote, uid, until);
        if !already {
            self.ctx.metrics.increment_quarantines();
            self.publisher.publish(&LifecycleEvent::Quarantined {
                remote: remote.clone(),
                uid,
            });
        }
    }

    fn handle_quarantine(&mut self, address: &Address, uid: Option<Uid>) {
        let policy = self.registry.writable_endpoint_with_policy_for(address).cloned();
        match (policy, uid) {
            (Some(EndpointPolicy::Pass { endpoint, .. }), None) => {
                log::warn!(
                    "[EndpointManager::handle_quarantine] Association to [{}] with unknown UID is reported as quarantined, but address cannot be quarantined without knowing the UID, gating instead for {} ms.",
                    address,
                    self.ctx.config.retry_gate_closed_for.as_millis()
                );
                self.ctx.metrics.increment_gates();
                let until = self.gate_deadline();
                self.registry.mark_as_failed(endpoint, until);
                self.stop_endpoint(endpoint, DisassociateInfo::Unknown);
            }
            (Some(EndpointPolicy::Pass { endpoint, uid: Some(current) }), Some(quarantined)) => {
                if current == quarantined {
                    self.quarantine_uid(address, quarantined);
                    self.stop_endpoint(endpoint, DisassociateInfo::Quarantined);
                }
                // Otherwise the endpoint already talks to a newer incarnation
            }
            (Some(EndpointPolicy::Pass { uid: None, .. }), Some(quarantined)) => {
                // Handshake pending: refuse the uid once it is revealed
                if self.registry.refuse_uid(address) != Some(quarantined) {
                    let until = self.quarantine_deadline();
                    self.registry
                        .register_writable_endpoint_refuse_uid(address, quarantined, until);
                }
            }
            (_, Some(quarantined)) => self.quarantine_uid(address, quarantined),
            (_, None) => {}
        }

        // Inbound-only endpoint of the same incarnation
        if let Some((endpoint, current)) = self.registry.read_only_endpoint_for(address) {
            if uid.map_or(true, |q| q == current) {
                self.stop_endpoint(endpoint, DisassociateInfo::Quarantined);
            }
        }

        let matches = |handle: &Arc<dyn AssociationHandle>| {
            handle.remote_address() == address && uid.map_or(true, |q| handle.remote_uid() == q)
        };
        let doomed: Vec<EndpointId> = self
            .pending_read_handoffs
            .iter()
            .filter(|(_, handle)| matches(handle))
            .map(|(endpoint, _)| *endpoint)
            .collect();
        for endpoint in doomed {
            if let Some(handle) = self.pending_read_handoffs.remove(&endpoint) {
                handle.disassociate(DisassociateInfo::Quarantined);
                self.awaiting_reader.remove(&handle.id());
            }
            self.stop_endpoint(endpoint, DisassociateInfo::Quarantined);
        }

        let mut dropped = Vec::new();
        for stash in self.stashed_inbound.values_mut() {
            stash.retain(|handle| {
                let drop = matches(handle);
                if drop {
                    dropped.push(Arc::clone(handle));
                }
                !drop
            });
        }
        for handle in dropped {
            handle.disassociate(DisassociateInfo::Quarantined);
            self.awaiting_reader.remove(&handle.id());
        }
    }

    fn stop_endpoint(&mut self, id: EndpointId, info: DisassociateInfo) {
        if let Some(supervisor) = self.supervisors.get_mut(&id) {
            let effects = supervisor.stop(info);
            self.apply_supervisor_effects(id, effects);
        } else {
            self.stop_writer(id, info);
        }
    }

    fn on_supervisor_stopped(&mut self, id: EndpointId) {
        if let Some(supervisor) = self.supervisors.remove(&id) {
            self.ctx.receive_buffers.remove(&Link::new(
                self.ctx.local_address.clone(),
                supervisor.remote().clone(),
            ));
        }
        self.on_endpoint_terminated(id);
    }

    fn on_endpoint_terminated(&mut self, id: EndpointId) {
        self.writers.remove(&id);
        self.accept_pending_reader(id);
        self.registry.unregister_endpoint(id);
        self.handle_stashed_inbound(id, false);
    }

    fn gate_deadline(&self) -> u64 {
        self.ctx.clock.deadline_after(self.ctx.config.retry_gate_closed_for)
    }

    fn quarantine_deadline(&self) -> u64 {
        self.ctx.clock.deadline_after(self.ctx.config.quarantine_duration)
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    fn begin_shutdown(&mut self) {
        if self.state != ManagerState::Accepting {
            return;
        }
        log::info!(
            "[EndpointManager::begin_shutdown] Shutting down remote daemon with {} endpoints",
            self.endpoint_count()
        );
        self.state = ManagerState::Flushing;

        let mut ids: Vec<EndpointId> = self.supervisors.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.mailbox
                .push_back(Mail::Supervisor(id, SupervisorCommand::FlushAndStop));
        }
        let mut ids: Vec<EndpointId> = self
            .writers
            .keys()
            .filter(|id| !self.supervisors.contains_key(id))
            .copied()
            .collect();
        ids.sort_unstable();
        for id in ids {
            self.mailbox
                .push_back(Mail::Writer(id, WriterCommand::FlushAndStop));
        }

        for (_, handle) in self.pending_read_handoffs.drain() {
            handle.disassociate(DisassociateInfo::Shutdown);
        }
        for (_, stash) in self.stashed_inbound.drain() {
            for handle in stash {
                handle.disassociate(DisassociateInfo::Shutdown);
            }
        }
        self.awaiting_reader.clear();
    }

    fn check_shutdown_complete(&mut self) {
        if self.state == ManagerState::Flushing
            && self.supervisors.is_empty()
            && self.writers.is_empty()
        {
            self.state = ManagerState::ShutDown;
            log::info!("[EndpointManager::check_shutdown_complete] Remoting shut down");
            self.publisher.publish(&LifecycleEvent::RemotingShutdown {
                local: self.ctx.local_address.clone(),
            });
        }
    }
}

impl fmt::Debug for EndpointManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointManager")
            .field("local_address", &self.ctx.local_address)
            .field("state", &self.state)
            .field("supervisors", &self.supervisors.len())
            .field("writers", &self.writers.len())
            .field("readers", &self.readers.len())
            .field("mailbox", &self.mailbox.len())
            .finish_non_exhaustive()
    }
}

/// Disassociation reason told to the remote side when a failed endpoint stops.
fn stop_reason(failure: &AssociationFailure) -> DisassociateInfo {
    match failure {
        AssociationFailure::Hopeless { uid: Some(_), .. } => DisassociateInfo::Quarantined,
        _ => DisassociateInfo::Unknown,
    }
}
