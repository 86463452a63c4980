// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive-side reordering and deduplication buffer
//!
//! Reader-side counterpart of [`AckedSendBuffer`](super::AckedSendBuffer).
//! Messages may arrive duplicated or out of order; only the contiguous prefix
//! following `last_delivered` is released, and every gap in front of a
//! buffered message is reported back as a nack.
//!
//! # Extraction
//!
//! ```text
//! last_delivered = 0, buf = {1, 2, 5}
//!
//!   1 -> successor of 0      deliver, last_delivered = 1
//!   2 -> successor of 1      deliver, last_delivered = 2
//!   5 -> gap after 2         nack {3, 4}
//!
//! result: deliver [1, 2], Ack{cumulative: 5, nacks: {3, 4}}, buf = {5}
//! ```
//!
//! A gap stays in the nack set of every extraction until the missing message
//! arrives. Callers keep gaps bounded with [`AckedReceiveBuffer::is_within_window`]:
//! a message far ahead of `last_delivered` would turn every later extraction
//! into one nack per missing sequence number.

use std::collections::BTreeMap;

use super::{Ack, HasSeqNo, SeqNo};

/// Immutable reordering buffer for reliably delivered messages.
///
/// # Invariants
///
/// - `buf` holds no message with `seq <= last_delivered`
/// - `cumulative_ack >= last_delivered`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckedReceiveBuffer<T> {
    last_delivered: SeqNo,
    cumulative_ack: SeqNo,
    buf: BTreeMap<SeqNo, T>,
}

impl<T: HasSeqNo + Clone> Default for AckedReceiveBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: HasSeqNo + Clone> AckedReceiveBuffer<T> {
    /// Empty buffer expecting sequence number `0` next.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_after(SeqNo::BEFORE_FIRST)
    }

    /// Empty buffer which considers everything up to `last_delivered` as delivered.
    #[must_use]
    pub fn starting_after(last_delivered: SeqNo) -> Self {
        Self {
            last_delivered,
            cumulative_ack: last_delivered,
            buf: BTreeMap::new(),
        }
    }

    /// Record an arrived message, returning the new snapshot.
    ///
    /// Idempotent: duplicates and already delivered messages only move
    /// `cumulative_ack`.
    #[must_use]
    pub fn receive(&self, msg: T) -> Self {
        let seq = msg.seq();
        let mut buf = self.buf.clone();
        if seq > self.last_delivered {
            buf.entry(seq).or_insert(msg);
        }
        Self {
            last_delivered: self.last_delivered,
            cumulative_ack: SeqNo::max_of(self.cumulative_ack, seq),
            buf,
        }
    }

    /// Extract the deliverable contiguous prefix.
    ///
    /// Returns the new snapshot, the messages to hand to the application in
    /// sequence order, and the acknowledgment to send back to the peer.
    #[must_use]
    pub fn extract_deliverable(&self) -> (Self, Vec<T>, Ack) {
        let mut deliver = Vec::new();
        let mut ack = Ack::new(self.cumulative_ack);
        let mut updated_last_delivered = self.last_delivered;
        let mut prev = self.last_delivered;

        for (seq, msg) in &self.buf {
            if seq.is_successor_of(updated_last_delivered) {
                deliver.push(msg.clone());
                updated_last_delivered = *seq;
            } else if !seq.is_successor_of(prev) {
                ack.add_nacks(prev.range_between(*seq));
            }
            prev = *seq;
        }

        let buf = self
            .buf
            .iter()
            .filter(|(seq, _)| **seq > updated_last_delivered)
            .map(|(seq, msg)| (*seq, msg.clone()))
            .collect();

        let updated = Self {
            last_delivered: updated_last_delivered,
            cumulative_ack: self.cumulative_ack,
            buf,
        };
        (updated, deliver, ack)
    }

    /// Merge the snapshot of a previous physical connection of the same association.
    ///
    /// Takes the larger `last_delivered` and `cumulative_ack` and the union of
    /// both buffers restricted to messages after the merged `last_delivered`.
    #[must_use]
    pub fn merge_from(&self, other: &Self) -> Self {
        let last_delivered = SeqNo::max_of(self.last_delivered, other.last_delivered);
        let cumulative_ack = SeqNo::max_of(self.cumulative_ack, other.cumulative_ack);
        let mut buf = BTreeMap::new();
        for (seq, msg) in self.buf.iter().chain(other.buf.iter()) {
            if *seq > last_delivered {
                buf.entry(*seq).or_insert_with(|| msg.clone());
            }
        }
        Self {
            last_delivered,
            cumulative_ack,
            buf,
        }
    }

    /// True when `seq` is at most `window` ahead of `last_delivered`.
    ///
    /// Already delivered sequence numbers are within the window.
    #[must_use]
    pub fn is_within_window(&self, seq: SeqNo, window: usize) -> bool {
        let ahead = seq.raw().wrapping_sub(self.last_delivered.raw());
        ahead <= i64::try_from(window).unwrap_or(i64::MAX)
    }

    #[must_use]
    pub fn last_delivered(&self) -> SeqNo {
        self.last_delivered
    }

    #[must_use]
    pub fn cumulative_ack(&self) -> SeqNo {
        self.cumulative_ack
    }

    /// Buffered sequence numbers, ascending.
    pub fn buffered_seqs(&self) -> impl Iterator<Item = SeqNo> + '_ {
        self.buf.keys().copied()
    }

    /// Number of received but undelivered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
