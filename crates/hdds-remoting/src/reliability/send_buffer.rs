// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Send-side retransmission buffer
//!
//! Holds outbound system messages until the peer acknowledges them. The buffer
//! is a value: [`AckedSendBuffer::buffer`] and [`AckedSendBuffer::acknowledge`]
//! return a new snapshot and leave the receiver untouched, so an owner can keep
//! the previous snapshot when an operation fails.

use std::collections::BTreeMap;

use super::{Ack, HasSeqNo, SeqNo};
use crate::error::BufferError;

/// Immutable buffer of outbound messages awaiting acknowledgment.
///
/// # Invariants
///
/// - appended messages carry a sequence number strictly greater than `max_seq`
/// - `non_acked.len() <= capacity`
///
/// # Example
///
/// ```
/// use hdds_remoting::reliability::{Ack, AckedSendBuffer, SeqNo, Sequenced};
///
/// let mut buf = AckedSendBuffer::new(8);
/// for seq in 0..5 {
///     buf = buf.buffer(Sequenced::new(SeqNo::new(seq), seq)).unwrap();
/// }
/// let buf = buf.acknowledge(&Ack::new(SeqNo::new(2))).unwrap();
/// let left: Vec<i64> = buf.non_acked().iter().map(|m| *m.message()).collect();
/// assert_eq!(left, vec![3, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct AckedSendBuffer<T> {
    capacity: usize,
    max_seq: SeqNo,
    non_acked: Vec<T>,
    nacked: Vec<T>,
}

impl<T: HasSeqNo + Clone> AckedSendBuffer<T> {
    /// Empty buffer accepting up to `capacity` unacknowledged messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            max_seq: SeqNo::BEFORE_FIRST,
            non_acked: Vec::new(),
            nacked: Vec::new(),
        }
    }

    /// Append a message, returning the new snapshot.
    ///
    /// # Errors
    ///
    /// - [`BufferError::OutOfOrder`] if `msg.seq() <= max_seq`
    /// - [`BufferError::CapacityExceeded`] if the buffer is full
    pub fn buffer(&self, msg: T) -> Result<Self, BufferError> {
        if msg.seq() <= self.max_seq {
            return Err(BufferError::OutOfOrder {
                seq: msg.seq(),
                max_seq: self.max_seq,
            });
        }
        if self.non_acked.len() >= self.capacity {
            return Err(BufferError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let mut non_acked = self.non_acked.clone();
        let max_seq = msg.seq();
        non_acked.push(msg);
        Ok(Self {
            capacity: self.capacity,
            max_seq,
            non_acked,
            nacked: self.nacked.clone(),
        })
    }

    /// Apply an acknowledgment, returning the new snapshot.
    ///
    /// Messages up to and including `ack.cumulative_ack()` are pruned; messages
    /// named in `ack.nacks()` are kept in the nacked set for retransmission.
    ///
    /// # Errors
    ///
    /// - [`BufferError::InvalidAck`] if the cumulative ack is beyond `max_seq`
    /// - [`BufferError::ResendUnfulfillable`] if a nacked message is no longer
    ///   held; the owning association cannot recover from this
    pub fn acknowledge(&self, ack: &Ack) -> Result<Self, BufferError> {
        if ack.cumulative_ack() > self.max_seq {
            return Err(BufferError::InvalidAck {
                cumulative_ack: ack.cumulative_ack(),
                max_seq: self.max_seq,
            });
        }

        // nacked ∪ non_acked, deduplicated by sequence number, restricted to the nacks
        let mut candidates: BTreeMap<SeqNo, &T> = BTreeMap::new();
        for msg in self.nacked.iter().chain(self.non_acked.iter()) {
            if ack.nacks().contains(&msg.seq()) {
                candidates.entry(msg.seq()).or_insert(msg);
            }
        }

        if candidates.len() < ack.nacks().len() {
            let missing = ack
                .nacks()
                .iter()
                .filter(|seq| !candidates.contains_key(seq))
                .copied()
                .collect();
            return Err(BufferError::ResendUnfulfillable { missing });
        }

        let nacked = candidates.into_values().cloned().collect();
        let non_acked = self
            .non_acked
            .iter()
            .filter(|msg| msg.seq() > ack.cumulative_ack())
            .cloned()
            .collect();

        Ok(Self {
            capacity: self.capacity,
            max_seq: self.max_seq,
            non_acked,
            nacked,
        })
    }

    /// Messages sent but not yet acknowledged, in sequence order.
    #[must_use]
    pub fn non_acked(&self) -> &[T] {
        &self.non_acked
    }

    /// Messages explicitly nacked by the peer, pending retransmission.
    #[must_use]
    pub fn nacked(&self) -> &[T] {
        &self.nacked
    }

    /// Highest sequence number ever buffered.
    #[must_use]
    pub fn max_seq(&self) -> SeqNo {
        self.max_seq
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when nothing is waiting for acknowledgment or retransmission.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.non_acked.is_empty() && self.nacked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::Sequenced;

    fn msg(seq: i64) -> Sequenced<i64> {
        Sequenced::new(SeqNo::new(seq), seq)
    }

    fn seqs(msgs: &[Sequenced<i64>]) -> Vec<i64> {
        msgs.iter().map(|m| m.seq().raw()).collect()
    }

    fn filled(capacity: usize, count: i64) -> AckedSendBuffer<Sequenced<i64>> {
        let mut buf = AckedSendBuffer::new(capacity);
        for seq in 0..count {
            buf = buf.buffer(msg(seq)).expect("in-order append");
        }
        buf
    }

    #[test]
    fn test_buffer_rejects_non_increasing_seq() {
        let buf = filled(10, 3);
        assert_eq!(
            buf.buffer(msg(2)).unwrap_err(),
            BufferError::OutOfOrder {
                seq: SeqNo::new(2),
                max_seq: SeqNo::new(2)
            }
        );
        assert!(matches!(
            buf.buffer(msg(0)),
            Err(BufferError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn test_buffer_capacity_limit() {
        let buf = filled(4, 4);
        assert_eq!(buf.non_acked().len(), 4);
        assert_eq!(
            buf.buffer(msg(4)).unwrap_err(),
            BufferError::CapacityExceeded { capacity: 4 }
        );
    }

    #[test]
    fn test_buffer_is_value_semantics() {
        let original = filled(10, 2);
        let grown = original.buffer(msg(2)).expect("append");
        assert_eq!(seqs(original.non_acked()), vec![0, 1]);
        assert_eq!(seqs(grown.non_acked()), vec![0, 1, 2]);
    }

    #[test]
    fn test_acknowledge_prunes_cumulative() {
        let buf = filled(10, 5).acknowledge(&Ack::new(SeqNo::new(2))).expect("ack");
        assert_eq!(seqs(buf.non_acked()), vec![3, 4]);
        assert!(buf.nacked().is_empty());
    }

    #[test]
    fn test_acknowledge_keeps_nacked_for_resend() {
        let buf = filled(10, 5)
            .acknowledge(&Ack::with_nacks(SeqNo::new(3), [SeqNo::new(1)]))
            .expect("ack");
        assert_eq!(seqs(buf.non_acked()), vec![4]);
        assert_eq!(seqs(buf.nacked()), vec![1]);

        // Nacked message survives another round naming it again
        let again = buf
            .acknowledge(&Ack::with_nacks(SeqNo::new(3), [SeqNo::new(1)]))
            .expect("ack");
        assert_eq!(seqs(again.nacked()), vec![1]);
    }

    #[test]
    fn test_acknowledge_resend_unfulfillable() {
        let buf = filled(10, 5).acknowledge(&Ack::new(SeqNo::new(2))).expect("ack");
        let err = buf
            .acknowledge(&Ack::with_nacks(SeqNo::new(2), [SeqNo::new(1)]))
            .unwrap_err();
        assert_eq!(
            err,
            BufferError::ResendUnfulfillable {
                missing: vec![SeqNo::new(1)]
            }
        );
    }

    #[test]
    fn test_acknowledge_invalid_ack() {
        let buf = filled(10, 3);
        assert!(matches!(
            buf.acknowledge(&Ack::new(SeqNo::new(3))),
            Err(BufferError::InvalidAck { .. })
        ));
    }

    #[test]
    fn test_is_settled_after_full_ack() {
        let buf = filled(10, 3);
        assert!(!buf.is_settled());
        let buf = buf.acknowledge(&Ack::new(SeqNo::new(2))).expect("ack");
        assert!(buf.is_settled());
    }
}
