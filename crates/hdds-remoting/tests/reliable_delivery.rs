// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::too_many_lines)] // Example/test code
#![allow(clippy::similar_names)] // Test variable naming

//! Reliable system-message delivery between two nodes over an in-memory
//! network: ordering, loss recovery through nacks, handoff to a new
//! connection and restart of the peer.

mod common;

use std::time::Duration;

use common::{system_to, user_to, Node, Pair};
use hdds_remoting::endpoint::{Link, SupervisorState};
use hdds_remoting::{RemotingConfig, SeqNo};

const ACK_TIMEOUT: Duration = Duration::from_millis(300);

#[test]
fn test_system_messages_delivered_in_order_and_acked() {
    let mut pair = Pair::new(RemotingConfig::default());
    let b = pair.b.address.clone();
    for i in 0..5 {
        pair.a.manager.send(system_to(&b, &format!("s{}", i)));
    }
    pair.pump();

    assert_eq!(pair.b.inbox.delivered(), vec!["s0", "s1", "s2", "s3", "s4"]);
    let pending = pair.a.manager.writable_snapshot(&b).expect("writable endpoint");
    assert_eq!(pending.non_acked.len(), 5);
    assert_eq!(pending.uid, Some(pair.b.uid));

    // B acknowledges once its ack timer fires
    pair.advance(ACK_TIMEOUT);
    let settled = pair.a.manager.writable_snapshot(&b).expect("writable endpoint");
    assert!(settled.non_acked.is_empty());
    assert!(settled.uid_confirmed);
    assert_eq!(pair.a.manager.metrics().snapshot().sys_msgs_acked, 5);
}

#[test]
fn test_passive_endpoint_carries_replies() {
    let mut pair = Pair::new(RemotingConfig::default());
    let a = pair.a.address.clone();
    let b = pair.b.address.clone();
    pair.a.manager.send(system_to(&b, "ping"));
    pair.pump();

    // B reuses the inbound association instead of dialing A
    pair.b.manager.send(user_to(&a, "pong"));
    pair.pump();

    assert_eq!(pair.a.inbox.delivered(), vec!["pong"]);
    assert_eq!(pair.a.manager.endpoint_count(), 1);
    assert_eq!(pair.b.manager.endpoint_count(), 1);
    let reverse = pair.b.manager.writable_snapshot(&a).expect("passive endpoint");
    assert_eq!(reverse.uid, Some(pair.a.uid));
}

#[test]
fn test_lost_frame_recovered_through_nack() {
    let mut pair = Pair::new(RemotingConfig::default());
    let b = pair.b.address.clone();
    pair.a.manager.send(system_to(&b, "s0"));
    pair.pump();

    pair.network.drop_next_frames(&b, 1);
    pair.a.manager.send(system_to(&b, "s1"));
    pair.a.manager.send(system_to(&b, "s2"));
    pair.pump();

    // s2 waits behind the gap
    assert_eq!(pair.b.inbox.delivered(), vec!["s0"]);

    for _ in 0..4 {
        pair.advance(ACK_TIMEOUT);
    }
    assert_eq!(pair.b.inbox.delivered(), vec!["s0", "s1", "s2"]);
    let snapshot = pair.a.manager.writable_snapshot(&b).expect("writable endpoint");
    assert!(snapshot.non_acked.is_empty());
    assert!(snapshot.nacked.is_empty());
    assert!(pair.a.manager.metrics().snapshot().sys_msgs_resent >= 1);
}

#[test]
fn test_restarted_peer_resets_sequence() {
    let mut pair = Pair::new(RemotingConfig::default());
    let b = pair.b.address.clone();
    pair.a.manager.send(system_to(&b, "s0"));
    pair.pump();
    pair.advance(ACK_TIMEOUT);
    assert_eq!(pair.b.inbox.delivered(), vec!["s0"]);

    pair.network.restart(&b, 303);
    pair.b = Node::start(
        b.clone(),
        303,
        &pair.network,
        &pair.codec,
        &pair.clock,
        RemotingConfig::default(),
    );
    pair.pump();

    let gated = pair.a.manager.writable_snapshot(&b).expect("supervisor survives");
    assert!(matches!(gated.supervisor_state, Some(SupervisorState::Gated { .. })));

    // Buffered while gated, dropped once the new incarnation answers
    pair.a.manager.send(system_to(&b, "stale"));
    pair.advance(Duration::from_secs(5));

    pair.a.manager.send(system_to(&b, "fresh"));
    let snapshot = pair.a.manager.writable_snapshot(&b).expect("writable endpoint");
    assert_eq!(snapshot.uid, Some(303));
    assert_eq!(snapshot.non_acked, vec![SeqNo::new(0)]);

    pair.pump();
    assert_eq!(pair.b.inbox.delivered(), vec!["fresh"]);
}

#[test]
fn test_takeover_mid_stream_keeps_gap_and_delivers_once() {
    let mut pair = Pair::new(RemotingConfig::default());
    let a = pair.a.address.clone();
    let b = pair.b.address.clone();
    pair.a.manager.send(system_to(&b, "s0"));
    pair.pump();
    pair.advance(ACK_TIMEOUT);

    // s1 is lost, s2 waits behind the gap on B
    pair.network.drop_next_frames(&b, 1);
    pair.a.manager.send(system_to(&b, "s1"));
    pair.a.manager.send(system_to(&b, "s2"));
    pair.pump();
    assert_eq!(pair.b.inbox.delivered(), vec!["s0"]);

    // A loses its connection; B keeps reading from the silent one
    pair.network.sever(&a);
    pair.pump();
    let gated = pair.a.manager.writable_snapshot(&b).expect("supervisor survives");
    assert!(matches!(gated.supervisor_state, Some(SupervisorState::Gated { .. })));
    assert_eq!(gated.non_acked, vec![SeqNo::new(1), SeqNo::new(2)]);
    assert_eq!(pair.b.manager.metrics().snapshot().handoffs, 0);

    // A reconnects with the same incarnation and B hands reading over
    pair.advance(Duration::from_secs(5));
    assert_eq!(pair.b.manager.metrics().snapshot().handoffs, 1);
    let saved = pair
        .b
        .manager
        .receive_buffers()
        .get(&Link::new(b.clone(), a.clone()))
        .expect("receive buffer saved on handoff");
    assert_eq!(saved.uid, pair.a.uid);

    pair.advance(Duration::from_secs(2));
    pair.advance(ACK_TIMEOUT);
    assert_eq!(pair.b.inbox.delivered(), vec!["s0", "s1", "s2"]);
    let settled = pair.a.manager.writable_snapshot(&b).expect("writable endpoint");
    assert_eq!(settled.supervisor_state, Some(SupervisorState::Active));
    assert!(settled.non_acked.is_empty());
}
