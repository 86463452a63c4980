// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure

//! Failure detectors driven by a manual clock.

use std::sync::Arc;
use std::time::Duration;

use hdds_remoting::{
    Address, DeadlineConfig, DeadlineFailureDetector, DefaultFailureDetectorRegistry,
    FailureDetector, FailureDetectorRegistry, ManualClock, PhiAccrualConfig,
    PhiAccrualFailureDetector,
};

fn phi_config() -> PhiAccrualConfig {
    PhiAccrualConfig {
        threshold: 8.0,
        max_sample_size: 10,
        min_std_deviation: Duration::from_millis(10),
        acceptable_heartbeat_pause: Duration::ZERO,
        first_heartbeat_estimate: Duration::from_secs(1),
    }
}

#[test]
fn test_phi_detector_tracks_heartbeat_rhythm() {
    let clock = Arc::new(ManualClock::new(0));
    let fd = PhiAccrualFailureDetector::new(phi_config(), clock.clone());
    assert!(fd.is_available());
    assert!(!fd.is_monitoring());

    for _ in 0..20 {
        fd.heartbeat();
        clock.advance(Duration::from_millis(100));
    }
    assert!(fd.is_monitoring());
    // History is capped, bootstrap samples are gone
    assert_eq!(fd.sample_count(), 10);
    assert!(fd.is_available());

    clock.advance(Duration::from_millis(1_000));
    assert!(fd.phi() > fd.threshold());
    assert!(!fd.is_available());

    // A heartbeat after the silence makes the node available again
    fd.heartbeat();
    assert!(fd.is_available());
    assert!(fd.phi() < 1.0);
}

#[test]
fn test_phi_grows_with_silence() {
    let clock = Arc::new(ManualClock::new(0));
    let fd = PhiAccrualFailureDetector::new(phi_config(), clock.clone());
    for _ in 0..5 {
        fd.heartbeat();
        clock.advance(Duration::from_millis(1_000));
    }
    fd.heartbeat();

    let mut last = fd.phi();
    for _ in 0..5 {
        clock.advance(Duration::from_millis(200));
        let current = fd.phi();
        assert!(current >= last, "phi decreased from {} to {}", last, current);
        last = current;
    }
}

#[test]
fn test_deadline_detector_with_registry() {
    let clock = Arc::new(ManualClock::new(0));
    let factory_clock = clock.clone();
    let registry: DefaultFailureDetectorRegistry<Address> =
        DefaultFailureDetectorRegistry::new(Box::new(move || -> Arc<dyn FailureDetector> {
            Arc::new(DeadlineFailureDetector::new(
                &DeadlineConfig {
                    acceptable_heartbeat_pause: Duration::from_secs(2),
                },
                factory_clock.clone(),
            ))
        }));
    let a = Address::new("a", "10.0.0.1", 2552);
    let b = Address::new("b", "10.0.0.2", 2552);

    assert!(registry.is_available(&a));
    assert!(!registry.is_monitoring(&a));
    assert!(registry.is_empty());

    registry.heartbeat(&a);
    registry.heartbeat(&b);
    assert_eq!(registry.len(), 2);

    clock.advance(Duration::from_millis(1_500));
    registry.heartbeat(&b);
    clock.advance(Duration::from_millis(1_000));
    assert!(!registry.is_available(&a));
    assert!(registry.is_available(&b));

    registry.remove(&a);
    assert!(registry.is_available(&a));
    assert!(!registry.is_monitoring(&a));
    assert!(registry.is_monitoring(&b));

    registry.reset();
    assert!(registry.is_empty());
}
