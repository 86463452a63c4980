// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node addresses and incarnation identifiers.

use std::fmt;
use std::sync::Arc;

/// Incarnation identifier of a node process.
///
/// Random per process start; distinguishes a restarted node from the previous
/// run at the same address.
pub type Uid = u64;

/// Network-level identity of an actor system: `system@host:port`.
///
/// Cheap to clone (shared strings); used as key of every per-peer map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    system: Arc<str>,
    host: Arc<str>,
    port: u16,
}

impl Address {
    #[must_use]
    pub fn new(system: &str, host: &str, port: u16) -> Self {
        Self {
            system: Arc::from(system),
            host: Arc::from(host),
            port,
        }
    }

    #[must_use]
    pub fn system(&self) -> &str {
        &self.system
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remoting://{}@{}:{}", self.system, self.host, self.port)
    }
}

/// Address plus the incarnation currently living there.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueAddress {
    pub address: Address,
    pub uid: Uid,
}

impl UniqueAddress {
    #[must_use]
    pub fn new(address: Address, uid: Uid) -> Self {
        Self { address, uid }
    }
}

impl fmt::Display for UniqueAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        let addr = Address::new("sys", "10.0.0.1", 2552);
        assert_eq!(addr.to_string(), "remoting://sys@10.0.0.1:2552");
        let unique = UniqueAddress::new(addr, 42);
        assert_eq!(unique.to_string(), "remoting://sys@10.0.0.1:2552#42");
    }

    #[test]
    fn test_address_equality_by_value() {
        assert_eq!(
            Address::new("sys", "host", 1),
            Address::new("sys", "host", 1)
        );
        assert_ne!(Address::new("sys", "host", 1), Address::new("sys", "host", 2));
    }
}
