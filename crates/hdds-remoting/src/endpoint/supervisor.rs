// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable delivery supervisor: one per writable endpoint.
//!
//! Owns the resend buffer of system messages and outlives the writers it
//! spawns, so system messages survive reconnections to the same remote
//! incarnation.
//!
//! # States
//!
//! | State | Behavior |
//! |-------|----------|
//! | `Active` | writer running, messages flow |
//! | `Gated { until }` | writer failed transiently; system messages buffered, user messages dead-lettered |
//! | `Idle` | no writer; the next message or pending resend spawns one |
//! | `FlushAndStop` | waiting for the writer to flush before stopping |
//!
//! A system message is written only once the remote incarnation is
//! confirmed. Acknowledgments arriving before that are queued and replayed
//! on confirmation; a different incarnation resets the resend buffer.

use std::sync::Arc;

use super::codec::DeadLetterReason;
use super::context::EndpointContext;
use super::envelope::{EndpointId, OutboundEnvelope, OutboundMessage};
use super::failure::AssociationFailure;
use super::transport::{AssociationHandle, DisassociateInfo};
use super::writer::WriterCommand;
use crate::address::{Address, Uid};
use crate::reliability::{Ack, AckedSendBuffer, HasSeqNo, SeqNo, Sequenced};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    Active,
    Gated { until: u64 },
    Idle,
    FlushAndStop,
    Stopped,
}

/// Input of the supervisor.
#[derive(Debug)]
pub enum SupervisorCommand {
    Send(OutboundEnvelope),
    /// Acknowledgment received from the remote side.
    Ack(Ack),
    /// The writer completed a handshake with incarnation `uid`.
    GotUid { uid: Uid, remote: Address },
    /// The writer stopped; `None` for an orderly stop.
    WriterTerminated(Option<AssociationFailure>),
    /// Leave the gate early: an inbound association from the remote arrived.
    Ungate,
    /// Idle check, answered with [`SupervisorEffect::Idle`] when no writer runs.
    IsIdle,
    StopReading,
    FlushAndStop,
}

/// Output of the supervisor, applied by the endpoint manager.
#[derive(Debug)]
pub enum SupervisorEffect {
    /// Create a writer for this endpoint, on `handle` when one is given.
    SpawnWriter {
        handle: Option<Arc<dyn AssociationHandle>>,
        refuse_uid: Option<Uid>,
    },
    StopWriter(DisassociateInfo),
    ToWriter(WriterCommand),
    /// Remote incarnation confirmed.
    GotUid { uid: Uid, remote: Address },
    Idle,
    StoppedReading,
    DeadLetter(OutboundEnvelope, DeadLetterReason),
    /// Failure the supervisor cannot handle; the manager decides and stops it.
    Escalate(AssociationFailure),
    /// The supervisor terminated.
    Stopped,
}

/// Resend buffer and writer lifecycle of one writable endpoint.
#[derive(Debug)]
pub struct ReliableDeliverySupervisor {
    ctx: EndpointContext,
    id: EndpointId,
    remote: Address,
    state: SupervisorState,
    writer_running: bool,
    current_handle: Option<Arc<dyn AssociationHandle>>,
    refuse_uid: Option<Uid>,
    uid: Option<Uid>,
    uid_confirmed: bool,
    resend_buffer: AckedSendBuffer<Sequenced<OutboundEnvelope>>,
    seq_counter: SeqNo,
    last_cumulative_ack: Option<SeqNo>,
    pending_acks: Vec<Ack>,
    bail_out_at: Option<u64>,
    silence_deadline: Option<u64>,
    next_resend_at: u64,
}

impl ReliableDeliverySupervisor {
    /// Create the supervisor and return the effect spawning its first writer.
    ///
    /// An inbound `handle` confirms the remote incarnation right away, unless
    /// it is the refused one.
    #[must_use]
    pub fn new(
        ctx: EndpointContext,
        id: EndpointId,
        remote: Address,
        handle: Option<Arc<dyn AssociationHandle>>,
        refuse_uid: Option<Uid>,
    ) -> (Self, Vec<SupervisorEffect>) {
        let uid = handle.as_ref().map(|h| h.remote_uid());
        let next_resend_at = ctx.clock.deadline_after(ctx.config.sys_resend_interval);
        let resend_buffer = AckedSendBuffer::new(ctx.config.system_message_buffer_size);
        let mut supervisor = Self {
            ctx,
            id,
            remote,
            state: SupervisorState::Active,
            writer_running: false,
            current_handle: handle,
            refuse_uid,
            uid,
            uid_confirmed: uid.is_some() && uid != refuse_uid,
            resend_buffer,
            seq_counter: SeqNo::new(0),
            last_cumulative_ack: None,
            pending_acks: Vec::new(),
            bail_out_at: None,
            silence_deadline: None,
            next_resend_at,
        };
        let effects = vec![supervisor.spawn_writer()];
        (supervisor, effects)
    }

    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    #[must_use]
    pub fn remote(&self) -> &Address {
        &self.remote
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    #[must_use]
    pub fn uid(&self) -> Option<Uid> {
        self.uid
    }

    #[must_use]
    pub fn is_uid_confirmed(&self) -> bool {
        self.uid_confirmed
    }

    #[must_use]
    pub fn is_writer_running(&self) -> bool {
        self.writer_running
    }

    #[must_use]
    pub fn resend_buffer(&self) -> &AckedSendBuffer<Sequenced<OutboundEnvelope>> {
        &self.resend_buffer
    }

    pub fn handle_command(&mut self, command: SupervisorCommand) -> Vec<SupervisorEffect> {
        // Acknowledgments are state independent
        let command = match command {
            SupervisorCommand::Ack(ack) => {
                if self.state == SupervisorState::Stopped {
                    return Vec::new();
                }
                if self.uid_confirmed {
                    return self.apply_ack(&ack);
                }
                self.pending_acks.push(ack);
                return Vec::new();
            }
            other => other,
        };
        match self.state {
            SupervisorState::Active => self.active(command),
            SupervisorState::Gated { .. } => self.gated(command),
            SupervisorState::Idle => self.idle(command),
            SupervisorState::FlushAndStop => self.flushing(command),
            SupervisorState::Stopped => match command {
                SupervisorCommand::Send(envelope) => vec![SupervisorEffect::DeadLetter(
                    envelope,
                    DeadLetterReason::EndpointStopped,
                )],
                _ => Vec::new(),
            },
        }
    }

    /// Fire due timers: gate expiry, periodic resend and idle silence.
    pub fn tick(&mut self, now_ms: u64) -> Vec<SupervisorEffect> {
        let mut effects = Vec::new();
        if let SupervisorState::Gated { until } = self.state {
            if now_ms >= until {
                effects.extend(self.ungate());
            }
        }
        if now_ms >= self.next_resend_at {
            self.next_resend_at = self.ctx.clock.deadline_after(self.ctx.config.sys_resend_interval);
            match self.state {
                SupervisorState::Active if self.uid_confirmed => effects.extend(self.resend_all()),
                SupervisorState::Idle if !self.resend_buffer.is_settled() => {
                    effects.push(self.spawn_writer());
                    effects.extend(self.resend_all());
                    self.go_to_active();
                }
                _ => {}
            }
        }
        if self.state == SupervisorState::Idle {
            if let Some(deadline) = self.silence_deadline {
                if now_ms >= deadline && !self.resend_buffer.is_settled() {
                    effects.push(SupervisorEffect::Escalate(AssociationFailure::hopeless(
                        self.uid,
                        "Unacknowledged system messages were pending on an idle association for too long",
                    )));
                }
            }
        }
        effects
    }

    /// Stop on request of the endpoint manager.
    ///
    /// Pending system messages go to dead letters.
    pub fn stop(&mut self, info: DisassociateInfo) -> Vec<SupervisorEffect> {
        self.stop_with(info, true)
    }

    fn active(&mut self, command: SupervisorCommand) -> Vec<SupervisorEffect> {
        match command {
            SupervisorCommand::Send(envelope) => self.handle_send(envelope),
            SupervisorCommand::GotUid { uid, remote } => self.got_uid(uid, remote),
            SupervisorCommand::WriterTerminated(failure) => {
                self.writer_running = false;
                match failure {
                    Some(failure) if failure.escalates() => {
                        vec![SupervisorEffect::Escalate(failure)]
                    }
                    Some(failure) => self.gate(&failure),
                    None => {
                        self.current_handle = None;
                        self.go_to_idle();
                        vec![SupervisorEffect::StoppedReading]
                    }
                }
            }
            SupervisorCommand::StopReading => {
                if self.writer_running {
                    vec![SupervisorEffect::ToWriter(WriterCommand::StopReading)]
                } else {
                    vec![SupervisorEffect::StoppedReading]
                }
            }
            SupervisorCommand::FlushAndStop => {
                let mut effects = self.resend_all();
                if self.writer_running {
                    effects.push(SupervisorEffect::ToWriter(WriterCommand::FlushAndStop));
                    self.state = SupervisorState::FlushAndStop;
                    effects
                } else {
                    effects.extend(self.stop_with(DisassociateInfo::Shutdown, true));
                    effects
                }
            }
            SupervisorCommand::Ack(_)
            | SupervisorCommand::Ungate
            | SupervisorCommand::IsIdle => Vec::new(),
        }
    }

    fn gated(&mut self, command: SupervisorCommand) -> Vec<SupervisorEffect> {
        match command {
            SupervisorCommand::Send(envelope) if envelope.is_system() => {
                let effects: Vec<SupervisorEffect> =
                    self.try_buffer(envelope).err().into_iter().collect();
                if self.bail_out_at.is_none() {
                    self.bail_out_at = Some(
                        self.ctx
                            .clock
                            .deadline_after(self.ctx.config.initial_sys_msg_delivery_timeout),
                    );
                }
                effects
            }
            SupervisorCommand::Send(envelope) => {
                vec![SupervisorEffect::DeadLetter(envelope, DeadLetterReason::Gated)]
            }
            SupervisorCommand::Ungate => self.ungate(),
            SupervisorCommand::IsIdle => vec![SupervisorEffect::Idle],
            SupervisorCommand::StopReading => vec![SupervisorEffect::StoppedReading],
            SupervisorCommand::FlushAndStop => self.stop_with(DisassociateInfo::Shutdown, true),
            SupervisorCommand::GotUid { .. }
            | SupervisorCommand::WriterTerminated(_)
            | SupervisorCommand::Ack(_) => Vec::new(),
        }
    }

    fn idle(&mut self, command: SupervisorCommand) -> Vec<SupervisorEffect> {
        match command {
            SupervisorCommand::Send(envelope) => {
                let mut effects = vec![self.spawn_writer()];
                effects.extend(self.handle_send(envelope));
                self.go_to_active();
                effects
            }
            SupervisorCommand::IsIdle => vec![SupervisorEffect::Idle],
            SupervisorCommand::StopReading => vec![SupervisorEffect::StoppedReading],
            SupervisorCommand::FlushAndStop => self.stop_with(DisassociateInfo::Shutdown, true),
            SupervisorCommand::GotUid { .. }
            | SupervisorCommand::WriterTerminated(_)
            | SupervisorCommand::Ungate
            | SupervisorCommand::Ack(_) => Vec::new(),
        }
    }

    fn flushing(&mut self, command: SupervisorCommand) -> Vec<SupervisorEffect> {
        match command {
            SupervisorCommand::WriterTerminated(_) => {
                self.writer_running = false;
                // Whatever is still unacknowledged is not resent anymore
                self.resend_buffer = AckedSendBuffer::new(self.resend_buffer.capacity());
                self.stop_with(DisassociateInfo::Shutdown, false)
            }
            SupervisorCommand::Send(envelope) => vec![SupervisorEffect::DeadLetter(
                envelope,
                DeadLetterReason::ShuttingDown,
            )],
            SupervisorCommand::StopReading => vec![SupervisorEffect::StoppedReading],
            _ => Vec::new(),
        }
    }

    fn handle_send(&mut self, envelope: OutboundEnvelope) -> Vec<SupervisorEffect> {
        if !envelope.is_system() {
            return vec![SupervisorEffect::ToWriter(WriterCommand::Send(
                OutboundMessage::unsequenced(envelope),
            ))];
        }
        let seq = self.seq_counter;
        match self.try_buffer(envelope.clone()) {
            Err(escalation) => vec![escalation],
            Ok(()) => {
                if self.uid_confirmed
                    && self.resend_buffer.non_acked().len() <= self.ctx.config.sys_resend_limit
                {
                    vec![SupervisorEffect::ToWriter(WriterCommand::Send(
                        OutboundMessage {
                            envelope,
                            seq: Some(seq),
                        },
                    ))]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Assign the next sequence number and keep the message for resending.
    fn try_buffer(&mut self, envelope: OutboundEnvelope) -> Result<(), SupervisorEffect> {
        let seq = self.seq_counter;
        match self.resend_buffer.buffer(Sequenced::new(seq, envelope)) {
            Ok(buffer) => {
                self.resend_buffer = buffer;
                self.seq_counter = seq.increment();
                self.ctx
                    .metrics
                    .record_buffered(self.resend_buffer.non_acked().len());
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "[ReliableDeliverySupervisor::try_buffer] Cannot buffer system message to {}: {}",
                    self.remote,
                    e
                );
                Err(SupervisorEffect::Escalate(AssociationFailure::from_buffer(
                    self.uid, &e,
                )))
            }
        }
    }

    fn apply_ack(&mut self, ack: &Ack) -> Vec<SupervisorEffect> {
        if self
            .last_cumulative_ack
            .is_some_and(|last| ack.cumulative_ack() < last)
        {
            log::trace!(
                "[ReliableDeliverySupervisor::apply_ack] Ignoring stale ack {} from {}",
                ack,
                self.remote
            );
            return Vec::new();
        }
        let before = self.resend_buffer.non_acked().len() + self.resend_buffer.nacked().len();
        match self.resend_buffer.acknowledge(ack) {
            Ok(buffer) => {
                let after = buffer.non_acked().len() + buffer.nacked().len();
                self.ctx
                    .metrics
                    .increment_acked(before.saturating_sub(after) as u64);
                self.resend_buffer = buffer;
                self.last_cumulative_ack = Some(ack.cumulative_ack());
                self.resend_nacked()
            }
            Err(e) => {
                log::error!(
                    "[ReliableDeliverySupervisor::apply_ack] Invalid ack {} from {}: {}",
                    ack,
                    self.remote,
                    e
                );
                vec![SupervisorEffect::Escalate(AssociationFailure::from_buffer(
                    self.uid, &e,
                ))]
            }
        }
    }

    fn got_uid(&mut self, received: Uid, remote: Address) -> Vec<SupervisorEffect> {
        self.bail_out_at = None;
        let mut effects = vec![SupervisorEffect::GotUid {
            uid: received,
            remote,
        }];
        self.uid_confirmed = true;
        if self.uid.is_some_and(|uid| uid != received) {
            self.reset();
        } else {
            for ack in std::mem::take(&mut self.pending_acks) {
                effects.extend(self.apply_ack(&ack));
            }
        }
        self.uid = Some(received);
        effects.extend(self.resend_all());
        effects
    }

    fn reset(&mut self) {
        log::info!(
            "[ReliableDeliverySupervisor::reset] Remote incarnation of {} changed, dropping {} unacknowledged system messages",
            self.remote,
            self.resend_buffer.non_acked().len()
        );
        self.resend_buffer = AckedSendBuffer::new(self.resend_buffer.capacity());
        self.seq_counter = SeqNo::new(0);
        self.last_cumulative_ack = None;
        self.pending_acks.clear();
        self.bail_out_at = None;
    }

    fn gate(&mut self, failure: &AssociationFailure) -> Vec<SupervisorEffect> {
        let gate_for = self.ctx.config.retry_gate_closed_for;
        log::warn!(
            "[ReliableDeliverySupervisor::gate] Association with remote system [{}] has failed, address is now gated for [{}] ms. Reason: [{}]",
            self.remote,
            gate_for.as_millis(),
            failure
        );
        self.uid_confirmed = false;
        self.current_handle = None;
        if !self.resend_buffer.is_settled() && self.bail_out_at.is_none() {
            self.bail_out_at = Some(
                self.ctx
                    .clock
                    .deadline_after(self.ctx.config.initial_sys_msg_delivery_timeout),
            );
        }
        self.state = SupervisorState::Gated {
            until: self.ctx.clock.deadline_after(gate_for),
        };
        self.ctx.metrics.increment_gates();
        vec![SupervisorEffect::StoppedReading]
    }

    fn ungate(&mut self) -> Vec<SupervisorEffect> {
        if self.resend_buffer.is_settled() {
            self.go_to_idle();
            return Vec::new();
        }
        if self
            .bail_out_at
            .is_some_and(|deadline| self.ctx.clock.is_overdue(deadline))
        {
            return vec![SupervisorEffect::Escalate(AssociationFailure::hopeless(
                self.uid,
                "Delivery of system messages timed out and they were dropped",
            ))];
        }
        let effects = vec![self.spawn_writer()];
        self.go_to_active();
        effects
    }

    fn resend_nacked(&self) -> Vec<SupervisorEffect> {
        if !self.uid_confirmed {
            return Vec::new();
        }
        let nacked = self.resend_buffer.nacked();
        self.ctx.metrics.increment_resent(nacked.len() as u64);
        nacked.iter().map(Self::write_sequenced).collect()
    }

    fn resend_all(&self) -> Vec<SupervisorEffect> {
        if !self.uid_confirmed {
            return Vec::new();
        }
        let mut effects = self.resend_nacked();
        let limit = self.ctx.config.sys_resend_limit;
        let non_acked = self.resend_buffer.non_acked();
        let count = non_acked.len().min(limit);
        self.ctx.metrics.increment_resent(count as u64);
        effects.extend(non_acked.iter().take(count).map(Self::write_sequenced));
        effects
    }

    fn write_sequenced(message: &Sequenced<OutboundEnvelope>) -> SupervisorEffect {
        SupervisorEffect::ToWriter(WriterCommand::Send(OutboundMessage {
            envelope: message.message().clone(),
            seq: Some(message.seq()),
        }))
    }

    fn spawn_writer(&mut self) -> SupervisorEffect {
        self.writer_running = true;
        if self.current_handle.is_none() {
            // A new outbound association has to confirm the incarnation again
            self.uid_confirmed = false;
        }
        SupervisorEffect::SpawnWriter {
            handle: self.current_handle.clone(),
            refuse_uid: self.refuse_uid,
        }
    }

    fn go_to_idle(&mut self) {
        if self.silence_deadline.is_none() && !self.resend_buffer.is_settled() {
            self.silence_deadline = Some(
                self.ctx
                    .clock
                    .deadline_after(self.ctx.config.quarantine_silent_system_timeout),
            );
        }
        self.state = SupervisorState::Idle;
    }

    fn go_to_active(&mut self) {
        self.silence_deadline = None;
        self.state = SupervisorState::Active;
    }

    fn stop_with(&mut self, info: DisassociateInfo, dead_letter_pending: bool) -> Vec<SupervisorEffect> {
        if self.state == SupervisorState::Stopped {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if self.writer_running {
            self.writer_running = false;
            effects.push(SupervisorEffect::StopWriter(info));
        }
        if dead_letter_pending {
            let pending = self
                .resend_buffer
                .nacked()
                .iter()
                .chain(self.resend_buffer.non_acked().iter());
            for message in pending {
                effects.push(SupervisorEffect::DeadLetter(
                    message.message().clone(),
                    DeadLetterReason::EndpointStopped,
                ));
            }
            self.resend_buffer = AckedSendBuffer::new(self.resend_buffer.capacity());
        }
        self.state = SupervisorState::Stopped;
        effects.push(SupervisorEffect::Stopped);
        effects
    }
}
