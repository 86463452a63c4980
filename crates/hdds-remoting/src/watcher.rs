// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node liveness monitoring
//!
//! Feeds heartbeats of watched nodes into a phi accrual registry and reports
//! the nodes judged unreachable. The caller turns each report into
//! [`EndpointManager::quarantine`](crate::endpoint::EndpointManager::quarantine).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::address::{Address, Uid};
use crate::clock::Clock;
use crate::config::{PhiAccrualConfig, RemotingConfig};
use crate::failure_detector::{
    DefaultFailureDetectorRegistry, FailureDetector, FailureDetectorRegistry,
    PhiAccrualFailureDetector,
};

/// Liveness monitor for remote nodes.
#[derive(Debug)]
pub struct NodeLivenessMonitor {
    detectors: DefaultFailureDetectorRegistry<Address>,
    watched: RwLock<HashMap<Address, Option<Uid>>>,
}

impl NodeLivenessMonitor {
    #[must_use]
    pub fn new(config: PhiAccrualConfig, clock: Arc<dyn Clock>) -> Self {
        let factory = move || -> Arc<dyn FailureDetector> {
            Arc::new(PhiAccrualFailureDetector::new(
                config.clone(),
                Arc::clone(&clock),
            ))
        };
        Self {
            detectors: DefaultFailureDetectorRegistry::new(Box::new(factory)),
            watched: RwLock::new(HashMap::new()),
        }
    }

    /// Monitor using the `watch_failure_detector` settings of `config`.
    #[must_use]
    pub fn from_config(config: &RemotingConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.watch_failure_detector.clone(), clock)
    }

    /// Start watching `address`. Monitoring begins with its first heartbeat.
    pub fn watch(&self, address: Address, uid: Option<Uid>) {
        log::debug!("[NodeLivenessMonitor::watch] Watching {} (uid={:?})", address, uid);
        let mut watched = self.watched.write();
        let previous = watched.insert(address.clone(), uid);
        if matches!((previous, uid), (Some(Some(old)), Some(new)) if old != new) {
            self.detectors.remove(&address);
        }
    }

    /// Stop watching `address` and drop its detector state.
    pub fn unwatch(&self, address: &Address) {
        if self.watched.write().remove(address).is_some() {
            log::debug!("[NodeLivenessMonitor::unwatch] Unwatched {}", address);
        }
        self.detectors.remove(address);
    }

    /// Heartbeat received from `address`. Ignored for unwatched nodes.
    ///
    /// A different uid than the recorded one means the node restarted: its
    /// history is discarded and monitoring starts over.
    pub fn heartbeat(&self, address: &Address, uid: Uid) {
        let restarted = {
            let watched = self.watched.read();
            match watched.get(address) {
                None => return,
                Some(known) => *known != Some(uid),
            }
        };
        if restarted {
            let mut watched = self.watched.write();
            if let Some(known) = watched.get_mut(address) {
                if known.is_some() {
                    log::debug!(
                        "[NodeLivenessMonitor::heartbeat] {} restarted with uid {}, resetting detector",
                        address,
                        uid
                    );
                    self.detectors.remove(address);
                }
                *known = Some(uid);
            }
        }
        self.detectors.heartbeat(address);
    }

    #[must_use]
    pub fn is_watching(&self, address: &Address) -> bool {
        self.watched.read().contains_key(address)
    }

    #[must_use]
    pub fn is_available(&self, address: &Address) -> bool {
        self.detectors.is_available(address)
    }

    #[must_use]
    pub fn watched_count(&self) -> usize {
        self.watched.read().len()
    }

    /// Remove and return every watched node whose detector judges it unavailable.
    pub fn reap_unreachable(&self) -> Vec<(Address, Option<Uid>)> {
        let mut watched = self.watched.write();
        let unreachable: Vec<(Address, Option<Uid>)> = watched
            .iter()
            .filter(|(address, _)| {
                self.detectors.is_monitoring(address) && !self.detectors.is_available(address)
            })
            .map(|(address, uid)| (address.clone(), *uid))
            .collect();
        for (address, uid) in &unreachable {
            log::warn!(
                "[NodeLivenessMonitor::reap_unreachable] Detected unreachable node {} (uid={:?})",
                address,
                uid
            );
            watched.remove(address);
            self.detectors.remove(address);
        }
        unreachable
    }
}
