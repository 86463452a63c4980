// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Collaborators shared by every endpoint of one manager.

use std::sync::Arc;

use super::codec::{Codec, Dispatcher};
use super::receive_store::ReceiveBufferStore;
use crate::address::Address;
use crate::clock::Clock;
use crate::config::RemotingConfig;
use crate::metrics::RemotingMetrics;

/// Cheap-to-clone bundle handed to readers, writers and supervisors.
#[derive(Clone)]
pub struct EndpointContext {
    pub local_address: Address,
    pub config: Arc<RemotingConfig>,
    pub clock: Arc<dyn Clock>,
    pub codec: Arc<dyn Codec>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub metrics: Arc<RemotingMetrics>,
    pub receive_buffers: Arc<ReceiveBufferStore>,
}

impl EndpointContext {
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

impl std::fmt::Debug for EndpointContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointContext")
            .field("local_address", &self.local_address)
            .finish_non_exhaustive()
    }
}
