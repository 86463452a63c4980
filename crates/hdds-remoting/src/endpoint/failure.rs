// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Association failure tiers.
//!
//! | Tier | Raised when | Outcome |
//! |------|-------------|---------|
//! | `Transient` | write failure, association attempt failed, plain disassociation | supervisor gates itself, keeps its resend buffer |
//! | `Shutdown` | remote shut down cleanly | manager gates the address |
//! | `InvalidAssociation` | remote quarantined us, handshake refused | manager gates the address |
//! | `Hopeless` | resend buffer desynchronized, bail-out or silence timeout | quarantine when the uid is known, gate otherwise |

use super::transport::DisassociateInfo;
use crate::address::Uid;
use crate::error::{BufferError, TransportError};

/// Failure of one association, classified by how far it escalates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssociationFailure {
    /// The remote system shut down the association in an orderly way.
    #[error("the remote system terminated the association because it is shutting down")]
    Shutdown,

    /// Handshake or compatibility problem, or we were quarantined remotely.
    #[error("invalid association: {reason}")]
    InvalidAssociation {
        reason: String,
        info: Option<DisassociateInfo>,
    },

    /// System message delivery can no longer be guaranteed.
    #[error("hopeless association (uid {uid:?}): {reason}")]
    Hopeless { uid: Option<Uid>, reason: String },

    /// Recoverable failure handled by gating inside the supervisor.
    #[error("transient association failure: {0}")]
    Transient(String),
}

impl AssociationFailure {
    /// Failures handled by the endpoint manager rather than the supervisor.
    #[must_use]
    pub fn escalates(&self) -> bool {
        !matches!(self, Self::Transient(_))
    }

    #[must_use]
    pub fn hopeless(uid: Option<Uid>, reason: impl Into<String>) -> Self {
        Self::Hopeless {
            uid,
            reason: reason.into(),
        }
    }

    /// Failure raised by a reader whose handle was disassociated by the remote side.
    #[must_use]
    pub fn from_disassociation(info: DisassociateInfo) -> Self {
        match info {
            DisassociateInfo::Unknown => Self::Transient("Disassociated".into()),
            DisassociateInfo::Shutdown => Self::Shutdown,
            DisassociateInfo::Quarantined => Self::InvalidAssociation {
                reason: "The remote system has quarantined this system. No further associations \
                         to the remote system are possible until this system is restarted."
                    .into(),
                info: Some(DisassociateInfo::Quarantined),
            },
        }
    }

    /// Failure of an outbound association attempt.
    #[must_use]
    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::RefusedUid { .. } => Self::InvalidAssociation {
                reason: err.to_string(),
                info: None,
            },
            TransportError::Shutdown => Self::Shutdown,
            TransportError::AssociationFailed(..) => Self::Transient(err.to_string()),
        }
    }

    /// Resend buffer failure: the two ends can no longer agree on system messages.
    #[must_use]
    pub fn from_buffer(uid: Option<Uid>, err: &BufferError) -> Self {
        Self::hopeless(
            uid,
            format!("error encountered while processing system message buffer: {}", err),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassociation_mapping() {
        assert!(!AssociationFailure::from_disassociation(DisassociateInfo::Unknown).escalates());
        assert_eq!(
            AssociationFailure::from_disassociation(DisassociateInfo::Shutdown),
            AssociationFailure::Shutdown
        );
        assert!(matches!(
            AssociationFailure::from_disassociation(DisassociateInfo::Quarantined),
            AssociationFailure::InvalidAssociation {
                info: Some(DisassociateInfo::Quarantined),
                ..
            }
        ));
    }

    #[test]
    fn test_transport_mapping() {
        let refused = TransportError::RefusedUid {
            remote: "b".into(),
            uid: 9,
        };
        assert!(AssociationFailure::from_transport(&refused).escalates());
        let unreachable = TransportError::AssociationFailed("b".into(), "refused".into());
        assert!(!AssociationFailure::from_transport(&unreachable).escalates());
    }
}
