// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-address writing policy.

use super::envelope::EndpointId;
use crate::address::Uid;

/// How outbound traffic to one remote address is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointPolicy {
    /// Traffic flows through `endpoint`. `uid` is set once the remote
    /// incarnation is confirmed.
    Pass {
        endpoint: EndpointId,
        uid: Option<Uid>,
    },
    /// No new outbound association before `until` (clock milliseconds).
    Gated { until: u64 },
    /// Incarnation `uid` is refused until the tombstone is pruned at `until`.
    Quarantined { uid: Uid, until: u64 },
}

impl EndpointPolicy {
    /// Gated and Quarantined entries expire; Pass entries do not.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        !matches!(self, Self::Pass { .. })
    }

    #[must_use]
    pub fn endpoint(&self) -> Option<EndpointId> {
        match self {
            Self::Pass { endpoint, .. } => Some(*endpoint),
            _ => None,
        }
    }
}
