// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport collaborator interfaces.
//!
//! The physical transport (sockets, handshake, framing) lives outside this
//! crate. It reports inbound associations, frames and disassociations to the
//! endpoint manager ([`ManagerCommand`](super::ManagerCommand)) and exposes
//! each physical connection as an [`AssociationHandle`].

use std::fmt;
use std::sync::Arc;

use super::codec::Frame;
use super::envelope::{EndpointId, HandleId};
use super::manager::ManagerCommand;
use crate::address::{Address, Uid};
use crate::error::TransportError;

/// Why an association handle is being closed, as told to the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisassociateInfo {
    /// No specific reason; the connection may be re-established.
    Unknown,
    /// Orderly shutdown of the remote system.
    Shutdown,
    /// The sender quarantined the receiver's incarnation.
    Quarantined,
}

/// One physical, handshaken connection to a remote system.
pub trait AssociationHandle: Send + Sync + fmt::Debug {
    fn id(&self) -> HandleId;

    fn local_address(&self) -> &Address;

    fn remote_address(&self) -> &Address;

    /// Incarnation announced by the remote side during the handshake.
    fn remote_uid(&self) -> Uid;

    /// Non-blocking write. `false` signals backpressure: retry later.
    fn write(&self, frame: &Frame) -> bool;

    /// Close the connection, telling the remote side why.
    fn disassociate(&self, info: DisassociateInfo);
}

/// Where asynchronous completions are submitted to the endpoint manager.
///
/// The manager queues completions internally by default;
/// [`RemotingRuntime`](crate::RemotingRuntime) routes them through its
/// channel so that they wake the remoting thread.
pub trait CommandSink: Send + Sync {
    fn submit_command(&self, command: ManagerCommand);
}

/// Outstanding outbound association attempt.
///
/// Completed exactly once through [`PendingAssociation::complete`], from any
/// thread. Dropping it uncompleted reports a failed attempt.
pub struct PendingAssociation {
    endpoint: EndpointId,
    attempt: u64,
    remote: Address,
    refuse_uid: Option<Uid>,
    sink: Option<Arc<dyn CommandSink>>,
}

impl PendingAssociation {
    pub(crate) fn new(
        endpoint: EndpointId,
        attempt: u64,
        remote: Address,
        refuse_uid: Option<Uid>,
        sink: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            endpoint,
            attempt,
            remote,
            refuse_uid,
            sink: Some(sink),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    #[must_use]
    pub fn remote(&self) -> &Address {
        &self.remote
    }

    /// Incarnation the handshake must refuse.
    #[must_use]
    pub fn refuse_uid(&self) -> Option<Uid> {
        self.refuse_uid
    }

    /// Report the outcome of the attempt.
    ///
    /// [`TransportError::RefusedUid`] when the remote answered with
    /// [`refuse_uid`](Self::refuse_uid); [`TransportError::AssociationFailed`]
    /// when it could not be reached.
    pub fn complete(mut self, result: Result<Arc<dyn AssociationHandle>, TransportError>) {
        self.finish(result);
    }

    fn finish(&mut self, result: Result<Arc<dyn AssociationHandle>, TransportError>) {
        if let Some(sink) = self.sink.take() {
            sink.submit_command(ManagerCommand::AssociationResult {
                endpoint: self.endpoint,
                attempt: self.attempt,
                result,
            });
        }
    }
}

impl Drop for PendingAssociation {
    fn drop(&mut self) {
        if self.sink.is_some() {
            log::debug!(
                "[PendingAssociation::drop] Attempt to {} abandoned by the transport",
                self.remote
            );
            let err = TransportError::AssociationFailed(
                self.remote.to_string(),
                "association attempt abandoned".into(),
            );
            self.finish(Err(err));
        }
    }
}

impl fmt::Debug for PendingAssociation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAssociation")
            .field("endpoint", &self.endpoint)
            .field("attempt", &self.attempt)
            .field("remote", &self.remote)
            .field("refuse_uid", &self.refuse_uid)
            .finish_non_exhaustive()
    }
}

/// Outbound association factory.
pub trait Transport: Send + Sync {
    /// Address this transport listens on.
    fn local_address(&self) -> &Address;

    /// Start opening an association to `pending.remote()`.
    ///
    /// Must not block: connecting and handshaking happen elsewhere and end
    /// with [`PendingAssociation::complete`].
    fn associate(&self, pending: PendingAssociation);
}
