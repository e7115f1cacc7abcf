//! Database-backed broker discovery
//!
//! Brokers that cannot rely on multicast find each other through a shared
//! table: every agent periodically writes its own address and heartbeat,
//! reads back the brokers that are still alive, and tells its listener
//! which peers appeared or went silent.

pub mod agent;
pub mod config;
pub mod error;
pub mod factory;
pub mod models;
pub mod notifier;
pub mod peers;
pub mod registry;

pub use agent::{AgentState, DiscoveryAgent, HostIdentity, ReconcileReport};
pub use config::AgentConfig;
pub use error::{DiscoveryError, DiscoveryResult};
pub use factory::create_agent;
pub use models::{DiscoveryEvent, PeerEntry, PeerKey};
pub use notifier::{DiscoveryListener, NotificationKind};
pub use registry::{BrokerStore, InMemoryBrokerStore, Registry, SqlBrokerStore};
