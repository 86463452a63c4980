// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-peer failure detector registry.
//!
//! Reads (`is_available`, `is_monitoring`, heartbeats to known peers) only
//! load the current map snapshot. Creating a detector for an unseen peer takes
//! a creation lock, re-checks the snapshot, and publishes a new map.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::FailureDetector;

/// Builds the detector of a newly seen peer.
pub type DetectorFactory = Box<dyn Fn() -> Arc<dyn FailureDetector> + Send + Sync>;

/// Failure detectors keyed by resource. Unknown resources are available and
/// unmonitored; the first heartbeat registers them.
pub trait FailureDetectorRegistry<A> {
    fn is_available(&self, resource: &A) -> bool;

    fn is_monitoring(&self, resource: &A) -> bool;

    fn heartbeat(&self, resource: &A);

    /// Drop the detector state of `resource`.
    fn remove(&self, resource: &A);

    /// Drop every detector.
    fn reset(&self);
}

/// Registry creating detectors on demand through a factory closure.
pub struct DefaultFailureDetectorRegistry<A> {
    factory: DetectorFactory,
    detectors: ArcSwap<HashMap<A, Arc<dyn FailureDetector>>>,
    creation: Mutex<()>,
}

impl<A: Eq + Hash + Clone> DefaultFailureDetectorRegistry<A> {
    #[must_use]
    pub fn new(factory: DetectorFactory) -> Self {
        Self {
            factory,
            detectors: ArcSwap::from_pointee(HashMap::new()),
            creation: Mutex::new(()),
        }
    }

    /// Detector currently registered for `resource`.
    #[must_use]
    pub fn detector(&self, resource: &A) -> Option<Arc<dyn FailureDetector>> {
        self.detectors.load().get(resource).cloned()
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.detectors.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detectors.load().is_empty()
    }
}

impl<A: Eq + Hash + Clone> FailureDetectorRegistry<A> for DefaultFailureDetectorRegistry<A> {
    fn is_available(&self, resource: &A) -> bool {
        self.detectors
            .load()
            .get(resource)
            .map_or(true, |fd| fd.is_available())
    }

    fn is_monitoring(&self, resource: &A) -> bool {
        self.detectors
            .load()
            .get(resource)
            .is_some_and(|fd| fd.is_monitoring())
    }

    fn heartbeat(&self, resource: &A) {
        if let Some(fd) = self.detectors.load().get(resource) {
            fd.heartbeat();
            return;
        }

        let _guard = self.creation.lock();
        // Another thread may have registered the resource while we waited
        let current = self.detectors.load_full();
        if let Some(fd) = current.get(resource) {
            fd.heartbeat();
            return;
        }

        let fd = (self.factory)();
        fd.heartbeat();
        let mut next = HashMap::clone(&current);
        next.insert(resource.clone(), fd);
        self.detectors.store(Arc::new(next));
    }

    fn remove(&self, resource: &A) {
        let _guard = self.creation.lock();
        self.detectors.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(resource);
            next
        });
    }

    fn reset(&self) {
        let _guard = self.creation.lock();
        self.detectors.store(Arc::new(HashMap::new()));
    }
}

impl<A> fmt::Debug for DefaultFailureDetectorRegistry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultFailureDetectorRegistry")
            .field("resources", &self.detectors.load().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DeadlineConfig;
    use crate::failure_detector::DeadlineFailureDetector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn registry(
        clock: &Arc<ManualClock>,
        created: &Arc<AtomicUsize>,
    ) -> DefaultFailureDetectorRegistry<&'static str> {
        let clock = Arc::clone(clock);
        let created = Arc::clone(created);
        DefaultFailureDetectorRegistry::new(Box::new(move || {
            created.fetch_add(1, Ordering::SeqCst);
            Arc::new(DeadlineFailureDetector::new(
                &DeadlineConfig {
                    acceptable_heartbeat_pause: Duration::from_millis(100),
                },
                clock.clone(),
            )) as Arc<dyn FailureDetector>
        }))
    }

    #[test]
    fn test_unknown_resource_available_not_monitored() {
        let clock = Arc::new(ManualClock::new(0));
        let created = Arc::new(AtomicUsize::new(0));
        let reg = registry(&clock, &created);
        assert!(reg.is_available(&"a"));
        assert!(!reg.is_monitoring(&"a"));
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_heartbeat_creates_once() {
        let clock = Arc::new(ManualClock::new(0));
        let created = Arc::new(AtomicUsize::new(0));
        let reg = registry(&clock, &created);
        reg.heartbeat(&"a");
        reg.heartbeat(&"a");
        reg.heartbeat(&"b");
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!(reg.is_monitoring(&"a"));
        assert_eq!(reg.len(), 2);

        clock.advance(Duration::from_millis(101));
        assert!(!reg.is_available(&"a"));
        reg.heartbeat(&"a");
        assert!(reg.is_available(&"a"));
        assert!(!reg.is_available(&"b"));
    }

    #[test]
    fn test_remove_and_reset() {
        let clock = Arc::new(ManualClock::new(0));
        let created = Arc::new(AtomicUsize::new(0));
        let reg = registry(&clock, &created);
        reg.heartbeat(&"a");
        reg.heartbeat(&"b");

        reg.remove(&"a");
        assert!(!reg.is_monitoring(&"a"));
        assert!(reg.is_monitoring(&"b"));

        reg.reset();
        assert!(reg.is_empty());

        reg.heartbeat(&"a");
        assert_eq!(created.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_concurrent_first_heartbeat_creates_single_detector() {
        let clock = Arc::new(ManualClock::new(0));
        let created = Arc::new(AtomicUsize::new(0));
        let reg = Arc::new(registry(&clock, &created));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || reg.heartbeat(&"peer"))
            })
            .collect();
        for handle in handles {
            handle.join().expect("heartbeat thread");
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }
}
