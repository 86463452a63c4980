// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remoting lifecycle events.

use std::fmt;

use crate::address::{Address, Uid};

/// Association lifecycle notification published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Associated {
        local: Address,
        remote: Address,
        inbound: bool,
    },
    Disassociated {
        local: Address,
        remote: Address,
        inbound: bool,
    },
    AssociationError {
        local: Address,
        remote: Address,
        inbound: bool,
        cause: String,
        level: log::Level,
    },
    Quarantined {
        remote: Address,
        uid: Uid,
    },
    RemotingListen {
        local: Address,
    },
    RemotingShutdown {
        local: Address,
    },
}

impl LifecycleEvent {
    /// Severity used when the event is logged.
    #[must_use]
    pub fn level(&self) -> log::Level {
        match self {
            Self::Associated { .. } | Self::Disassociated { .. } => log::Level::Debug,
            Self::AssociationError { level, .. } => *level,
            Self::Quarantined { .. } => log::Level::Warn,
            Self::RemotingListen { .. } | Self::RemotingShutdown { .. } => log::Level::Info,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = |inbound: &bool| if *inbound { "<-" } else { "->" };
        match self {
            Self::Associated {
                local,
                remote,
                inbound,
            } => write!(f, "Associated [{}] {} [{}]", local, direction(inbound), remote),
            Self::Disassociated {
                local,
                remote,
                inbound,
            } => write!(f, "Disassociated [{}] {} [{}]", local, direction(inbound), remote),
            Self::AssociationError {
                local,
                remote,
                inbound,
                cause,
                ..
            } => write!(
                f,
                "AssociationError [{}] {} [{}]: {}",
                local,
                direction(inbound),
                remote,
                cause
            ),
            Self::Quarantined { remote, uid } => {
                write!(f, "Association to [{}] having UID [{}] is irrecoverably failed", remote, uid)
            }
            Self::RemotingListen { local } => write!(f, "Remoting now listens on address [{}]", local),
            Self::RemotingShutdown { local } => write!(f, "Remoting shut down [{}]", local),
        }
    }
}

/// Consumer of lifecycle events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &LifecycleEvent);
}

/// Publishes every event to the `log` facade at its own severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventPublisher;

impl EventPublisher for LogEventPublisher {
    fn publish(&self, event: &LifecycleEvent) {
        log::log!(event.level(), "[LogEventPublisher::publish] {}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_levels() {
        let local = Address::new("a", "h", 1);
        let remote = Address::new("b", "h", 2);
        let assoc = LifecycleEvent::Associated {
            local: local.clone(),
            remote: remote.clone(),
            inbound: false,
        };
        assert_eq!(assoc.level(), log::Level::Debug);
        assert_eq!(
            assoc.to_string(),
            "Associated [remoting://a@h:1] -> [remoting://b@h:2]"
        );

        let err = LifecycleEvent::AssociationError {
            local,
            remote: remote.clone(),
            inbound: true,
            cause: "boom".into(),
            level: log::Level::Error,
        };
        assert_eq!(err.level(), log::Level::Error);
        assert_eq!(
            LifecycleEvent::Quarantined { remote, uid: 3 }.level(),
            log::Level::Warn
        );
        LogEventPublisher.publish(&err);
    }
}
