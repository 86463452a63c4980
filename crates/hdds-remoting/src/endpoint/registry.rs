// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint registry: per-address policies and endpoint bookkeeping.
//!
//! Owned by the endpoint manager, mutated from its mailbox only.
//!
//! | Map | Content |
//! |-----|---------|
//! | address -> policy | writing policy ([`EndpointPolicy`]) |
//! | writable endpoint -> address | reverse index of `Pass` entries |
//! | address -> read-only endpoint | inbound-only endpoint and its remote uid |
//! | address -> refused uid | quarantined incarnation, survives a new `Pass` entry |

use std::collections::HashMap;

use super::envelope::EndpointId;
use super::policy::EndpointPolicy;
use crate::address::{Address, Uid};

/// Policy table and endpoint indexes of the endpoint manager.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    address_to_writable: HashMap<Address, EndpointPolicy>,
    writable_to_address: HashMap<EndpointId, Address>,
    address_to_read_only: HashMap<Address, (EndpointId, Uid)>,
    read_only_to_address: HashMap<EndpointId, Address>,
    address_to_refuse_uid: HashMap<Address, (Uid, u64)>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the writing endpoint of `address`.
    ///
    /// Replaces a Gated or Quarantined entry (the quarantined uid stays in the
    /// refuse-uid map). Returns `false` and changes nothing when a `Pass`
    /// entry already exists.
    pub fn register_writable_endpoint(
        &mut self,
        address: &Address,
        uid: Option<Uid>,
        endpoint: EndpointId,
    ) -> bool {
        if let Some(EndpointPolicy::Pass { endpoint: existing, .. }) = self.address_to_writable.get(address) {
            log::error!(
                "[EndpointRegistry::register_writable_endpoint] Attempting to overwrite existing endpoint {} with {} for {}",
                existing,
                endpoint,
                address
            );
            return false;
        }
        self.address_to_writable
            .insert(address.clone(), EndpointPolicy::Pass { endpoint, uid });
        self.writable_to_address.insert(endpoint, address.clone());
        true
    }

    /// Record the confirmed uid of the writing endpoint of `address`.
    pub fn register_writable_endpoint_uid(&mut self, address: &Address, uid: Uid) {
        if let Some(EndpointPolicy::Pass { uid: current, .. }) = self.address_to_writable.get_mut(address) {
            *current = Some(uid);
        }
    }

    /// Refuse `uid` for `address` until `until` without touching its policy.
    pub fn register_writable_endpoint_refuse_uid(&mut self, address: &Address, uid: Uid, until: u64) {
        self.address_to_refuse_uid.insert(address.clone(), (uid, until));
    }

    pub fn register_read_only_endpoint(&mut self, address: &Address, endpoint: EndpointId, uid: Uid) {
        self.address_to_read_only
            .insert(address.clone(), (endpoint, uid));
        self.read_only_to_address.insert(endpoint, address.clone());
    }

    /// Forget a stopped endpoint. Tombstones and refused uids stay.
    pub fn unregister_endpoint(&mut self, endpoint: EndpointId) {
        if let Some(address) = self.writable_to_address.remove(&endpoint) {
            let owned = matches!(
                self.address_to_writable.get(&address),
                Some(EndpointPolicy::Pass { endpoint: current, .. }) if *current == endpoint
            );
            if owned {
                self.address_to_writable.remove(&address);
            }
        } else {
            self.forget_read_only(endpoint);
        }
    }

    fn forget_read_only(&mut self, endpoint: EndpointId) {
        if let Some(address) = self.read_only_to_address.remove(&endpoint) {
            // A newer read-only endpoint may already serve the address
            if self
                .address_to_read_only
                .get(&address)
                .is_some_and(|(current, _)| *current == endpoint)
            {
                self.address_to_read_only.remove(&address);
            }
        }
    }

    #[must_use]
    pub fn address_for_writer(&self, endpoint: EndpointId) -> Option<&Address> {
        self.writable_to_address.get(&endpoint)
    }

    #[must_use]
    pub fn writable_endpoint_with_policy_for(&self, address: &Address) -> Option<&EndpointPolicy> {
        self.address_to_writable.get(address)
    }

    #[must_use]
    pub fn has_writable_endpoint_for(&self, address: &Address) -> bool {
        matches!(
            self.address_to_writable.get(address),
            Some(EndpointPolicy::Pass { .. })
        )
    }

    #[must_use]
    pub fn read_only_endpoint_for(&self, address: &Address) -> Option<(EndpointId, Uid)> {
        self.address_to_read_only.get(address).copied()
    }

    #[must_use]
    pub fn is_writable(&self, endpoint: EndpointId) -> bool {
        self.writable_to_address.contains_key(&endpoint)
    }

    #[must_use]
    pub fn is_read_only(&self, endpoint: EndpointId) -> bool {
        self.read_only_to_address.contains_key(&endpoint)
    }

    /// True if incarnation `uid` of `address` is quarantined.
    ///
    /// Deadlines only drive pruning: an entry still present is reported as
    /// quarantined even past its deadline.
    #[must_use]
    pub fn is_quarantined(&self, address: &Address, uid: Uid) -> bool {
        match self.address_to_writable.get(address) {
            Some(EndpointPolicy::Quarantined { uid: q, .. }) if *q == uid => true,
            _ => self
                .address_to_refuse_uid
                .get(address)
                .is_some_and(|(refused, _)| *refused == uid),
        }
    }

    /// Incarnation of `address` that must be refused, if any.
    #[must_use]
    pub fn refuse_uid(&self, address: &Address) -> Option<Uid> {
        match self.address_to_writable.get(address) {
            Some(EndpointPolicy::Quarantined { uid, .. }) => Some(*uid),
            _ => self.address_to_refuse_uid.get(address).map(|(uid, _)| *uid),
        }
    }

    /// Gate the address of `endpoint` until `until`.
    ///
    /// No outbound association is attempted while gated; inbound ones are
    /// still accepted. A Quarantined entry is never downgraded. A read-only
    /// endpoint is simply forgotten.
    pub fn mark_as_failed(&mut self, endpoint: EndpointId, until: u64) {
        if let Some(address) = self.writable_to_address.get(&endpoint).cloned() {
            match self.address_to_writable.get(&address) {
                Some(EndpointPolicy::Quarantined { .. }) | Some(EndpointPolicy::Gated { .. }) => {}
                _ => {
                    log::debug!(
                        "[EndpointRegistry::mark_as_failed] Gating {} until {}",
                        address,
                        until
                    );
                    self.address_to_writable
                        .insert(address, EndpointPolicy::Gated { until });
                    self.writable_to_address.remove(&endpoint);
                }
            }
        } else {
            self.forget_read_only(endpoint);
        }
    }

    /// Quarantine incarnation `uid` of `address` until `until`.
    pub fn mark_as_quarantined(&mut self, address: &Address, uid: Uid, until: u64) {
        self.address_to_writable
            .insert(address.clone(), EndpointPolicy::Quarantined { uid, until });
        self.address_to_refuse_uid
            .insert(address.clone(), (uid, until));
    }

    pub fn remove_policy(&mut self, address: &Address) {
        self.address_to_writable.remove(address);
    }

    /// Every live endpoint, writable and read-only.
    #[must_use]
    pub fn all_endpoints(&self) -> Vec<EndpointId> {
        self.writable_to_address
            .keys()
            .chain(self.read_only_to_address.keys())
            .copied()
            .collect()
    }

    /// Drop Gated/Quarantined entries and refused uids whose deadline passed.
    /// Pass entries are never pruned.
    pub fn prune(&mut self, now_ms: u64) {
        let before = self.address_to_writable.len() + self.address_to_refuse_uid.len();
        self.address_to_writable.retain(|_, policy| match policy {
            EndpointPolicy::Pass { .. } => true,
            EndpointPolicy::Gated { until } | EndpointPolicy::Quarantined { until, .. } => {
                *until > now_ms
            }
        });
        self.address_to_refuse_uid
            .retain(|_, (_, until)| *until > now_ms);
        let removed = before - self.address_to_writable.len() - self.address_to_refuse_uid.len();
        if removed > 0 {
            log::debug!("[EndpointRegistry::prune] Pruned {} expired entries", removed);
        }
    }
}
