// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cumulative + selective acknowledgment.

use std::collections::BTreeSet;
use std::fmt;

use super::SeqNo;

/// Acknowledgment sent back by the receiving side.
///
/// - `cumulative_ack`: highest sequence number observed by the receiver
/// - `nacks`: sequence numbers at or below `cumulative_ack` known to be missing
///
/// Invariant: every nack is `<= cumulative_ack`. Constructors drop values that
/// would violate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    cumulative_ack: SeqNo,
    nacks: BTreeSet<SeqNo>,
}

impl Ack {
    /// Pure cumulative acknowledgment without nacks.
    #[must_use]
    pub fn new(cumulative_ack: SeqNo) -> Self {
        Self {
            cumulative_ack,
            nacks: BTreeSet::new(),
        }
    }

    /// Acknowledgment with explicit negative acknowledgments.
    #[must_use]
    pub fn with_nacks(cumulative_ack: SeqNo, nacks: impl IntoIterator<Item = SeqNo>) -> Self {
        let nacks = nacks
            .into_iter()
            .filter(|seq| *seq <= cumulative_ack)
            .collect();
        Self {
            cumulative_ack,
            nacks,
        }
    }

    #[must_use]
    pub fn cumulative_ack(&self) -> SeqNo {
        self.cumulative_ack
    }

    #[must_use]
    pub fn nacks(&self) -> &BTreeSet<SeqNo> {
        &self.nacks
    }

    pub(crate) fn add_nacks(&mut self, missing: impl IntoIterator<Item = SeqNo>) {
        let cumulative = self.cumulative_ack;
        self.nacks
            .extend(missing.into_iter().filter(|seq| *seq <= cumulative));
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ACK[{}, {{", self.cumulative_ack)?;
        for (i, nack) in self.nacks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", nack)?;
        }
        write!(f, "}}]")
    }
}
