// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint writer: outbound side of one association.
//!
//! # State Machine
//!
//! ```text
//!                Associated(Ok)             write backpressure
//! Initializing ----------------> Writing ----------------------> Buffering
//!      |                          ^  |  <----------------------      |
//!      | Associated(Err)          |  |       buffers drained         |
//!      v                          |  | TakeOver                      |
//!   Stopped <---------------- Handoff <------------------------------+
//!             any failure           old reader terminated
//! ```
//!
//! The writer owns the transport handle and the reader attached to it. It
//! never decides on failures itself: every stop is reported to the parent
//! (supervisor or endpoint manager) as [`WriterNotice::Terminated`].
//!
//! System messages are written before user messages once the writer starts
//! buffering; acknowledgments piggyback on outgoing messages, with a pure
//! acknowledgment frame when none went out for `sys_msg_ack_timeout`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::backoff::{AdaptiveBackoff, Backoff};
use super::codec::DeadLetterReason;
use super::context::EndpointContext;
use super::envelope::{EndpointId, HandleId, OutboundEnvelope, OutboundMessage};
use super::events::LifecycleEvent;
use super::failure::AssociationFailure;
use super::transport::{AssociationHandle, DisassociateInfo};
use crate::address::{Address, Uid};
use crate::clock::duration_ms;
use crate::error::TransportError;
use crate::reliability::Ack;

/// Minimum interval between two "buffer too large" warnings.
const LARGE_BUFFER_LOG_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterState {
    /// Waiting for the outbound association attempt.
    Initializing,
    /// Writing directly to the handle.
    Writing,
    /// Backpressured: draining the buffers on a backoff timer.
    Buffering,
    /// Waiting for the reader of the replaced handle to terminate.
    Handoff,
    Stopped,
}

/// Input of the writer.
#[derive(Debug)]
pub enum WriterCommand {
    Send(OutboundMessage),
    /// Acknowledgment produced by the local reader, to piggyback.
    OutboundAck(Ack),
    /// Result of the association attempt requested by [`WriterEffect::Associate`].
    Associated(Result<Arc<dyn AssociationHandle>, TransportError>),
    ReaderTerminated {
        handle: HandleId,
        failure: Option<AssociationFailure>,
    },
    /// Stop delivering inbound messages; answered with [`WriterEffect::StoppedReading`].
    StopReading,
    /// Replace the current handle with a newer inbound one.
    TakeOver(Arc<dyn AssociationHandle>),
    /// Write what is pending, then stop.
    FlushAndStop,
    /// Backoff elapsed or another batch is due.
    BackoffTimer,
}

/// Notification for the owner of the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterNotice {
    /// The handshake revealed the remote incarnation.
    GotUid { uid: Uid, remote: Address },
    /// The writer stopped; `None` for an orderly stop.
    Terminated(Option<AssociationFailure>),
}

/// Output of the writer, applied by the endpoint manager.
#[derive(Debug)]
pub enum WriterEffect {
    /// Open an association to the remote address.
    Associate { refuse_uid: Option<Uid> },
    /// Start a reader on the handle, owned by this writer.
    StartReader(Arc<dyn AssociationHandle>),
    /// Stop the reader attached to the handle.
    StopReader(HandleId),
    /// Make the reader stop delivering and save its buffer.
    StopReaderReading(HandleId),
    Notify(WriterNotice),
    /// Answer to [`WriterCommand::StopReading`].
    StoppedReading,
    /// The handle of a pending inbound association was adopted.
    TookOver(HandleId),
    DeadLetter(OutboundEnvelope, DeadLetterReason),
    Publish(LifecycleEvent),
    /// Run [`WriterCommand::BackoffTimer`] again without delay.
    Continue,
}

#[derive(Debug)]
enum Buffered {
    Send(OutboundMessage),
    /// Marker queued by a flush request while buffering.
    FlushAndStop,
}

/// Outbound side of one association.
#[derive(Debug)]
pub struct EndpointWriter {
    ctx: EndpointContext,
    id: EndpointId,
    remote: Address,
    inbound: bool,
    reliable_delivery: bool,
    state: WriterState,
    handle: Option<Arc<dyn AssociationHandle>>,
    reader: Option<HandleId>,
    prio_buffer: VecDeque<OutboundMessage>,
    buffer: VecDeque<Buffered>,
    last_ack: Option<Ack>,
    ack_deadline: u64,
    backoff: AdaptiveBackoff,
    backoff_at: Option<u64>,
    flush_deadline: Option<u64>,
    large_buffer_logged_at: Option<u64>,
    stop_reason: DisassociateInfo,
}

impl EndpointWriter {
    /// Create the writer and return its start-up effects.
    ///
    /// With a `handle` (inbound association) the writer starts writing at once
    /// and attaches a reader; without one it asks for an outbound association.
    /// `reliable_delivery` is false for read-only endpoints, which have no
    /// supervisor keeping their system messages.
    #[must_use]
    pub fn new(
        ctx: EndpointContext,
        id: EndpointId,
        remote: Address,
        handle: Option<Arc<dyn AssociationHandle>>,
        refuse_uid: Option<Uid>,
        reliable_delivery: bool,
    ) -> (Self, Vec<WriterEffect>) {
        let ack_deadline = ctx.clock.deadline_after(ctx.config.sys_msg_ack_timeout);
        let backoff = AdaptiveBackoff::new(&ctx.config);
        let mut writer = Self {
            ctx,
            id,
            remote,
            inbound: handle.is_some(),
            reliable_delivery,
            state: WriterState::Initializing,
            handle: None,
            reader: None,
            prio_buffer: VecDeque::new(),
            buffer: VecDeque::new(),
            last_ack: None,
            ack_deadline,
            backoff,
            backoff_at: None,
            flush_deadline: None,
            large_buffer_logged_at: None,
            stop_reason: DisassociateInfo::Unknown,
        };
        let effects = match handle {
            Some(handle) => {
                writer.state = WriterState::Writing;
                writer.attach_reader(handle)
            }
            None => vec![WriterEffect::Associate { refuse_uid }],
        };
        (writer, effects)
    }

    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> WriterState {
        self.state
    }

    #[must_use]
    pub fn remote(&self) -> &Address {
        &self.remote
    }

    #[must_use]
    pub fn is_inbound(&self) -> bool {
        self.inbound
    }

    #[must_use]
    pub fn handle(&self) -> Option<&Arc<dyn AssociationHandle>> {
        self.handle.as_ref()
    }

    #[must_use]
    pub fn reader(&self) -> Option<HandleId> {
        self.reader
    }

    /// Messages waiting in the buffers.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.prio_buffer.len() + self.buffer.len()
    }

    pub fn handle_command(&mut self, command: WriterCommand) -> Vec<WriterEffect> {
        if self.state == WriterState::Stopped {
            return self.handle_after_stop(command);
        }
        match command {
            WriterCommand::Send(message) => self.send(message),
            WriterCommand::OutboundAck(ack) => {
                self.last_ack = Some(ack);
                if self.ctx.clock.is_overdue(self.ack_deadline) {
                    self.try_send_pure_ack();
                }
                Vec::new()
            }
            WriterCommand::Associated(result) => self.associated(result),
            WriterCommand::ReaderTerminated { handle, failure } => {
                self.reader_terminated(handle, failure)
            }
            WriterCommand::StopReading => match self.reader {
                Some(reader) => vec![
                    WriterEffect::StopReaderReading(reader),
                    WriterEffect::StoppedReading,
                ],
                None => vec![WriterEffect::StoppedReading],
            },
            WriterCommand::TakeOver(handle) => self.take_over(handle),
            WriterCommand::FlushAndStop => self.flush_and_stop(),
            WriterCommand::BackoffTimer => {
                if self.state == WriterState::Buffering {
                    self.backoff_at = None;
                    self.send_buffered_messages()
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Fire due timers: backoff, flush timeout and ack idle check.
    pub fn tick(&mut self, now_ms: u64) -> Vec<WriterEffect> {
        match self.state {
            WriterState::Buffering => {
                if self.flush_deadline.is_some_and(|d| now_ms >= d) {
                    log::debug!(
                        "[EndpointWriter::tick] Flush of {} timed out with {} messages pending",
                        self.remote,
                        self.buffered_len()
                    );
                    return self.stop(None);
                }
                if self.backoff_at.is_some_and(|d| now_ms >= d) {
                    self.backoff_at = None;
                    return self.send_buffered_messages();
                }
                Vec::new()
            }
            WriterState::Writing => {
                if now_ms >= self.ack_deadline {
                    self.try_send_pure_ack();
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Stop the writer on request of its owner.
    pub fn stop_with(&mut self, info: DisassociateInfo) -> Vec<WriterEffect> {
        self.stop_reason = info;
        self.stop(None)
    }

    fn handle_after_stop(&mut self, command: WriterCommand) -> Vec<WriterEffect> {
        match command {
            WriterCommand::Send(message) if message.seq.is_none() || !self.reliable_delivery => {
                vec![WriterEffect::DeadLetter(
                    message.envelope,
                    DeadLetterReason::EndpointStopped,
                )]
            }
            WriterCommand::Associated(Ok(handle)) => {
                handle.disassociate(DisassociateInfo::Unknown);
                Vec::new()
            }
            WriterCommand::TakeOver(handle) => {
                handle.disassociate(DisassociateInfo::Unknown);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn send(&mut self, message: OutboundMessage) -> Vec<WriterEffect> {
        match self.state {
            WriterState::Writing => {
                if self.handle.is_none() {
                    return self.stop(Some(AssociationFailure::Transient(
                        "writer has no association handle".into(),
                    )));
                }
                match self.write_send(message) {
                    Ok(()) => Vec::new(),
                    Err(message) => {
                        self.enqueue(message);
                        let delay = self.backoff.adaptive_backoff();
                        self.schedule_backoff(Backoff::Short(delay));
                        self.state = WriterState::Buffering;
                        Vec::new()
                    }
                }
            }
            _ => {
                self.enqueue(message);
                Vec::new()
            }
        }
    }

    fn associated(
        &mut self,
        result: Result<Arc<dyn AssociationHandle>, TransportError>,
    ) -> Vec<WriterEffect> {
        if self.state != WriterState::Initializing {
            if let Ok(handle) = result {
                handle.disassociate(DisassociateInfo::Unknown);
            }
            return Vec::new();
        }
        match result {
            Ok(handle) => {
                let mut effects = vec![
                    WriterEffect::Notify(WriterNotice::GotUid {
                        uid: handle.remote_uid(),
                        remote: handle.remote_address().clone(),
                    }),
                    WriterEffect::Publish(LifecycleEvent::Associated {
                        local: self.ctx.local_address.clone(),
                        remote: self.remote.clone(),
                        inbound: false,
                    }),
                ];
                effects.extend(self.attach_reader(handle));
                effects.extend(self.become_writing_or_send_buffered());
                effects
            }
            Err(e) => {
                let failure = AssociationFailure::from_transport(&e);
                let level = if failure.escalates() {
                    log::Level::Warn
                } else {
                    log::Level::Debug
                };
                let mut effects = vec![WriterEffect::Publish(LifecycleEvent::AssociationError {
                    local: self.ctx.local_address.clone(),
                    remote: self.remote.clone(),
                    inbound: false,
                    cause: e.to_string(),
                    level,
                })];
                effects.extend(self.stop(Some(failure)));
                effects
            }
        }
    }

    fn reader_terminated(
        &mut self,
        handle: HandleId,
        failure: Option<AssociationFailure>,
    ) -> Vec<WriterEffect> {
        if self.reader != Some(handle) {
            return Vec::new();
        }
        self.reader = None;
        if self.state == WriterState::Handoff {
            let Some(new_handle) = self.handle.clone() else {
                return self.stop(Some(AssociationFailure::Transient(
                    "handoff without association handle".into(),
                )));
            };
            log::debug!(
                "[EndpointWriter::reader_terminated] Handoff of {} complete, reading from {}",
                self.remote,
                new_handle.id()
            );
            self.ctx.metrics.increment_handoffs();
            let mut effects = self.attach_reader(new_handle);
            effects.extend(self.become_writing_or_send_buffered());
            return effects;
        }
        self.stop(Some(
            failure.unwrap_or_else(|| AssociationFailure::Transient("Disassociated".into())),
        ))
    }

    fn take_over(&mut self, handle: Arc<dyn AssociationHandle>) -> Vec<WriterEffect> {
        let mut effects = vec![WriterEffect::TookOver(handle.id())];
        if let Some(old) = self.handle.replace(handle) {
            log::debug!(
                "[EndpointWriter::take_over] Replacing association {} to {}",
                old.id(),
                self.remote
            );
            old.disassociate(DisassociateInfo::Unknown);
        }
        self.inbound = true;
        match self.reader {
            Some(reader) => {
                self.state = WriterState::Handoff;
                effects.push(WriterEffect::StopReader(reader));
            }
            None => {
                if let Some(handle) = self.handle.clone() {
                    effects.extend(self.attach_reader(handle));
                }
                effects.extend(self.become_writing_or_send_buffered());
            }
        }
        effects
    }

    fn flush_and_stop(&mut self) -> Vec<WriterEffect> {
        self.stop_reason = DisassociateInfo::Shutdown;
        match self.state {
            WriterState::Writing => {
                self.try_send_pure_ack();
                self.stop(None)
            }
            WriterState::Buffering => {
                self.buffer.push_back(Buffered::FlushAndStop);
                self.flush_deadline = Some(self.ctx.clock.deadline_after(self.ctx.config.flush_wait));
                Vec::new()
            }
            _ => self.stop(None),
        }
    }

    fn attach_reader(&mut self, handle: Arc<dyn AssociationHandle>) -> Vec<WriterEffect> {
        self.reader = Some(handle.id());
        self.handle = Some(handle.clone());
        vec![WriterEffect::StartReader(handle)]
    }

    fn become_writing_or_send_buffered(&mut self) -> Vec<WriterEffect> {
        if self.prio_buffer.is_empty() && self.buffer.is_empty() {
            self.state = WriterState::Writing;
            Vec::new()
        } else {
            self.state = WriterState::Buffering;
            self.send_buffered_messages()
        }
    }

    fn send_buffered_messages(&mut self) -> Vec<WriterEffect> {
        let size = self.buffered_len();

        let mut ok = true;
        while let Some(message) = self.prio_buffer.pop_front() {
            if let Err(message) = self.write_send(message) {
                self.prio_buffer.push_front(message);
                ok = false;
                break;
            }
        }

        if ok {
            let mut remaining = self.backoff.batch_size();
            while remaining > 0 {
                match self.buffer.pop_front() {
                    None => break,
                    Some(Buffered::FlushAndStop) => return self.stop(None),
                    Some(Buffered::Send(message)) => match self.write_send(message) {
                        Ok(()) => {
                            self.backoff.record_write();
                            remaining -= 1;
                        }
                        Err(message) => {
                            self.buffer.push_front(Buffered::Send(message));
                            ok = false;
                            break;
                        }
                    },
                }
            }
            // A flush marker is all that is left: nothing more to write
            if matches!(self.buffer.front(), Some(Buffered::FlushAndStop)) && self.buffer.len() == 1 {
                return self.stop(None);
            }
        }

        if self.prio_buffer.is_empty() && self.buffer.is_empty() {
            self.backoff.reset();
            self.state = WriterState::Writing;
            Vec::new()
        } else if ok {
            self.backoff.record_no_backoff();
            vec![WriterEffect::Continue]
        } else {
            self.log_large_buffer(size);
            let next = self.backoff.next_backoff();
            self.schedule_backoff(next);
            Vec::new()
        }
    }

    /// Write one message; `Err` hands it back on backpressure.
    fn write_send(&mut self, message: OutboundMessage) -> Result<(), OutboundMessage> {
        let Some(handle) = self.handle.clone() else {
            return Err(message);
        };
        let frame = match self.ctx.codec.construct_message(
            &self.ctx.local_address,
            &message.envelope,
            message.seq,
            self.last_ack.as_ref(),
        ) {
            Ok(frame) => frame,
            Err(e) => {
                // Counted as written: the association stays up
                log::error!(
                    "[EndpointWriter::write_send] Transient association error (association remains live) to {}: {}",
                    message.envelope.recipient,
                    e
                );
                return Ok(());
            }
        };
        if handle.write(&frame) {
            self.ack_deadline = self.ctx.clock.deadline_after(self.ctx.config.sys_msg_ack_timeout);
            self.last_ack = None;
            Ok(())
        } else {
            Err(message)
        }
    }

    fn try_send_pure_ack(&mut self) {
        let (Some(handle), Some(ack)) = (&self.handle, &self.last_ack) else {
            return;
        };
        if handle.write(&self.ctx.codec.construct_pure_ack(ack)) {
            self.ctx.metrics.increment_pure_acks();
            self.ack_deadline = self.ctx.clock.deadline_after(self.ctx.config.sys_msg_ack_timeout);
            self.last_ack = None;
        }
    }

    fn enqueue(&mut self, message: OutboundMessage) {
        if message.envelope.is_system() {
            self.prio_buffer.push_back(message);
        } else {
            self.buffer.push_back(Buffered::Send(message));
        }
    }

    fn schedule_backoff(&mut self, backoff: Backoff) {
        let delay_ms = match backoff {
            Backoff::Full(d) => duration_ms(d),
            // Sub-millisecond delays run on the next clock tick
            Backoff::Short(d) => duration_ms(d + Duration::from_nanos(999_999)).max(1),
        };
        self.backoff_at = Some(self.ctx.now_ms().saturating_add(delay_ms));
    }

    fn log_large_buffer(&mut self, size: usize) {
        if size <= self.ctx.config.log_buffer_size_exceeding {
            return;
        }
        let now = self.ctx.now_ms();
        let due = self
            .large_buffer_logged_at
            .map_or(true, |at| now.saturating_sub(at) >= LARGE_BUFFER_LOG_INTERVAL_MS);
        if due {
            log::warn!(
                "[EndpointWriter::send_buffered_messages] Buffer of [{}] has {} messages. Transport is not keeping up.",
                self.remote,
                size
            );
            self.large_buffer_logged_at = Some(now);
        }
    }

    fn stop(&mut self, failure: Option<AssociationFailure>) -> Vec<WriterEffect> {
        if self.state == WriterState::Stopped {
            return Vec::new();
        }
        self.state = WriterState::Stopped;
        self.backoff_at = None;
        self.flush_deadline = None;

        let mut effects = Vec::new();
        let reliable = self.reliable_delivery;
        let pending = self.prio_buffer.drain(..).chain(self.buffer.drain(..).filter_map(
            |b| match b {
                Buffered::Send(message) => Some(message),
                Buffered::FlushAndStop => None,
            },
        ));
        // Sequenced messages stay in the supervisor's resend buffer
        for message in pending {
            if message.seq.is_none() || !reliable {
                effects.push(WriterEffect::DeadLetter(
                    message.envelope,
                    DeadLetterReason::EndpointStopped,
                ));
            }
        }

        if let Some(handle) = &self.handle {
            handle.disassociate(self.stop_reason);
            effects.push(WriterEffect::Publish(LifecycleEvent::Disassociated {
                local: self.ctx.local_address.clone(),
                remote: self.remote.clone(),
                inbound: self.inbound,
            }));
        }
        if let Some(reader) = self.reader {
            effects.push(WriterEffect::StopReader(reader));
        }
        effects.push(WriterEffect::Notify(WriterNotice::Terminated(failure)));
        effects
    }
}
