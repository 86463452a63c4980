// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence-number carrying wrapper stored in the acked buffers.

use super::SeqNo;

/// Anything the acked buffers can store: it must expose its sequence number.
pub trait HasSeqNo {
    /// Sequence number assigned by the sending side.
    fn seq(&self) -> SeqNo;
}

/// A message paired with the sequence number it was assigned.
///
/// Messages that never receive a sequence number (ordinary user traffic)
/// are not wrapped and bypass the buffers entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequenced<T> {
    seq: SeqNo,
    message: T,
}

impl<T> Sequenced<T> {
    #[must_use]
    pub fn new(seq: SeqNo, message: T) -> Self {
        Self { seq, message }
    }

    #[must_use]
    pub fn message(&self) -> &T {
        &self.message
    }

    #[must_use]
    pub fn into_message(self) -> T {
        self.message
    }
}

impl<T> HasSeqNo for Sequenced<T> {
    fn seq(&self) -> SeqNo {
        self.seq
    }
}
