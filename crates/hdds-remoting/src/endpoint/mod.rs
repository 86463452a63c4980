// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Endpoint Management
//!
//! One endpoint per remote association. A writable endpoint owns a
//! [`ReliableDeliverySupervisor`] and the [`EndpointWriter`] it spawns; a
//! read-only endpoint is a bare writer answering an inbound association.
//! Every writer attaches an [`EndpointReader`] to its association handle.
//!
//! ```text
//!                      EndpointManager
//!                    /        |        \
//!      ReliableDeliverySupervisor   EndpointRegistry (address -> policy)
//!                  |
//!            EndpointWriter ---- AssociationHandle (transport)
//!                  |
//!            EndpointReader ---- ReceiveBufferStore (survives the reader)
//! ```
//!
//! ## Address Policies
//!
//! | Policy | Outbound traffic |
//! |--------|------------------|
//! | `Pass` | routed to the writable endpoint |
//! | `Gated` | dead-lettered until the gate expires |
//! | `Quarantined` | a new endpoint is created, refusing the quarantined uid |
//!
//! The machines are synchronous: they take a command and return effects.
//! [`EndpointManager`] owns all of them and applies the effects in order.

mod backoff;
mod codec;
mod context;
mod envelope;
mod events;
mod failure;
mod manager;
mod policy;
mod reader;
mod receive_store;
mod registry;
mod supervisor;
mod transport;
mod writer;

#[cfg(test)]
pub(crate) mod testkit;

pub use backoff::{AdaptiveBackoff, Backoff};
pub use codec::{Codec, DeadLetterReason, DecodedFrame, Dispatcher, Frame};
pub use context::EndpointContext;
pub use envelope::{
    EndpointId, HandleId, InboundMessage, MessageKind, OutboundEnvelope, OutboundMessage, Payload,
    RemoteRef, SequencedInbound,
};
pub use events::{EventPublisher, LifecycleEvent, LogEventPublisher};
pub use failure::AssociationFailure;
pub use manager::{
    EndpointManager, EndpointManagerBuilder, EndpointSnapshot, ManagerCommand, ManagerState,
};
pub use policy::EndpointPolicy;
pub use reader::{EndpointReader, ReaderEffect};
pub use receive_store::{Link, ReceiveBufferStore, ResendState};
pub use registry::EndpointRegistry;
pub use supervisor::{
    ReliableDeliverySupervisor, SupervisorCommand, SupervisorEffect, SupervisorState,
};
pub use transport::{
    AssociationHandle, CommandSink, DisassociateInfo, PendingAssociation, Transport,
};
pub use writer::{EndpointWriter, WriterCommand, WriterEffect, WriterNotice, WriterState};
