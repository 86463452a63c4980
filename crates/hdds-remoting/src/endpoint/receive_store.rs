// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive buffer persistence across physical connections.
//!
//! A reader stores its receive buffer here when it stops or hands off; the
//! next reader of the same link merges it on start, so system messages are
//! neither lost nor delivered twice when the connection is replaced.
//!
//! # Concurrency
//!
//! Readers of different handles of the same link may save concurrently.
//! Updates are optimistic: [`ReceiveBufferStore::compare_and_update`] only
//! succeeds when the stored state is still the one the caller based its
//! update on (`Arc` identity), otherwise the caller reloads and retries.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::envelope::SequencedInbound;
use crate::address::{Address, Uid};
use crate::reliability::AckedReceiveBuffer;

/// Local/remote address pair identifying a logical association.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub local: Address,
    pub remote: Address,
}

impl Link {
    #[must_use]
    pub fn new(local: Address, remote: Address) -> Self {
        Self { local, remote }
    }
}

/// Saved receive buffer of one remote incarnation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResendState {
    pub uid: Uid,
    pub buffer: AckedReceiveBuffer<SequencedInbound>,
}

/// Concurrent map of saved receive buffers.
#[derive(Debug, Default)]
pub struct ReceiveBufferStore {
    states: DashMap<Link, Arc<ResendState>>,
}

impl ReceiveBufferStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, link: &Link) -> Option<Arc<ResendState>> {
        self.states.get(link).map(|entry| Arc::clone(entry.value()))
    }

    /// Replace the state of `link` with `new` if it is still `expected`
    /// (`None` = absent). Returns `false` when another update won the race.
    pub fn compare_and_update(
        &self,
        link: &Link,
        expected: Option<&Arc<ResendState>>,
        new: Arc<ResendState>,
    ) -> bool {
        match self.states.entry(link.clone()) {
            Entry::Occupied(mut entry) => match expected {
                Some(expected) if Arc::ptr_eq(entry.get(), expected) => {
                    entry.insert(new);
                    true
                }
                _ => false,
            },
            Entry::Vacant(entry) => {
                if expected.is_none() {
                    entry.insert(new);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Save `buffer` for incarnation `uid`, merging with a previously saved
    /// buffer of the same incarnation and replacing one of another incarnation.
    pub fn save_state(&self, link: &Link, uid: Uid, buffer: &AckedReceiveBuffer<SequencedInbound>) {
        loop {
            let expected = self.get(link);
            let next = match &expected {
                Some(saved) if saved.uid == uid => ResendState {
                    uid,
                    buffer: saved.buffer.merge_from(buffer),
                },
                _ => ResendState {
                    uid,
                    buffer: buffer.clone(),
                },
            };
            if self.compare_and_update(link, expected.as_ref(), Arc::new(next)) {
                return;
            }
        }
    }

    pub fn remove(&self, link: &Link) {
        self.states.remove(link);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::envelope::{InboundMessage, RemoteRef};
    use crate::reliability::SeqNo;

    fn link() -> Link {
        Link::new(Address::new("a", "h", 1), Address::new("b", "h", 2))
    }

    fn msg(seq: i64) -> SequencedInbound {
        let message = InboundMessage {
            recipient: RemoteRef::new(Address::new("a", "h", 1), "target"),
            sender: None,
            payload: Arc::from(&[seq as u8][..]),
            seq: Some(SeqNo::new(seq)),
        };
        SequencedInbound::from_message(message).expect("sequenced")
    }

    #[test]
    fn test_compare_and_update_detects_races() {
        let store = ReceiveBufferStore::new();
        let first = Arc::new(ResendState {
            uid: 1,
            buffer: AckedReceiveBuffer::new(),
        });
        assert!(store.compare_and_update(&link(), None, Arc::clone(&first)));
        // Stale expectation: absent
        assert!(!store.compare_and_update(&link(), None, Arc::clone(&first)));

        let second = Arc::new(ResendState {
            uid: 1,
            buffer: AckedReceiveBuffer::new().receive(msg(0)),
        });
        assert!(store.compare_and_update(&link(), Some(&first), Arc::clone(&second)));
        // Stale expectation: replaced meanwhile
        assert!(!store.compare_and_update(&link(), Some(&first), first.clone()));
    }

    #[test]
    fn test_save_state_merges_same_uid() {
        let store = ReceiveBufferStore::new();
        store.save_state(&link(), 1, &AckedReceiveBuffer::new().receive(msg(2)));
        store.save_state(&link(), 1, &AckedReceiveBuffer::new().receive(msg(3)));
        let saved = store.get(&link()).expect("saved");
        assert_eq!(
            saved.buffer.buffered_seqs().collect::<Vec<_>>(),
            vec![SeqNo::new(2), SeqNo::new(3)]
        );
    }

    #[test]
    fn test_save_state_replaces_other_uid() {
        let store = ReceiveBufferStore::new();
        store.save_state(&link(), 1, &AckedReceiveBuffer::new().receive(msg(2)));
        store.save_state(&link(), 2, &AckedReceiveBuffer::new().receive(msg(5)));
        let saved = store.get(&link()).expect("saved");
        assert_eq!(saved.uid, 2);
        assert_eq!(
            saved.buffer.buffered_seqs().collect::<Vec<_>>(),
            vec![SeqNo::new(5)]
        );
    }

    #[test]
    fn test_concurrent_saves_lose_nothing() {
        let store = Arc::new(ReceiveBufferStore::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let seq = 1 + t * 25 + i;
                        store.save_state(&link(), 9, &AckedReceiveBuffer::new().receive(msg(seq)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("saver thread");
        }
        let saved = store.get(&link()).expect("saved");
        assert_eq!(saved.buffer.len(), 100);
    }
}
