use std::hash::{Hash, Hasher};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Identity of a broker as seen by reconciliation: name and address together
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub name: String,
    pub address: String,
}

/// One known broker
///
/// Two entries are the same broker only if both `name` and `address` match.
/// A broker that moved to a new address is a different entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    pub name: String,
    pub address: String,
    /// Epoch milliseconds
    pub last_heartbeat: i64,
    #[serde(default)]
    pub is_local: bool,
}

impl PeerEntry {
    /// A remote broker, heartbeat set to now
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::with_heartbeat(name, address, now_millis())
    }

    pub fn with_heartbeat(
        name: impl Into<String>,
        address: impl Into<String>,
        last_heartbeat: i64,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            last_heartbeat,
            is_local: false,
        }
    }

    /// The entry representing this process
    pub fn local(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            is_local: true,
            ..Self::new(name, address)
        }
    }

    pub fn key(&self) -> PeerKey {
        PeerKey {
            name: self.name.clone(),
            address: self.address.clone(),
        }
    }

    /// Refresh the heartbeat. Never moves it backwards.
    pub fn touch(&mut self) {
        self.last_heartbeat = self.last_heartbeat.max(now_millis());
    }

    pub fn event(&self) -> DiscoveryEvent {
        DiscoveryEvent {
            address: self.address.clone(),
            name: self.name.clone(),
        }
    }
}

impl PartialEq for PeerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.address == other.address
    }
}

impl Eq for PeerEntry {}

impl Hash for PeerEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.address.hash(state);
    }
}

impl std::fmt::Display for PeerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerEntry[address={}, name={}]", self.address, self.name)
    }
}

/// Payload handed to a [`DiscoveryListener`](crate::notifier::DiscoveryListener)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    pub address: String,
    pub name: String,
}

impl DiscoveryEvent {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}
