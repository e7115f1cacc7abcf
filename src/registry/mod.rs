//! Broker registry: the shared table every agent writes itself into
//!
//! [`BrokerStore`] is the raw storage contract and reports every failure.
//! [`Registry`] wraps a store with the one failure policy the agent uses:
//! nothing is retried and nothing propagates. A failed write is logged and
//! skipped, a failed read yields `None` so the caller can keep its current
//! view for that cycle.

mod memory;
mod sql;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::DiscoveryResult;
use crate::models::PeerEntry;

pub use memory::InMemoryBrokerStore;
pub use sql::SqlBrokerStore;

#[cfg(test)]
use mockall::automock;

/// Storage for broker rows keyed by address
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerStore: Send + Sync {
    /// Create the broker table. Fails if it already exists.
    async fn init_schema(&self) -> DiscoveryResult<()>;

    /// Insert a row. Fails on a duplicate address.
    async fn insert(&self, entry: &PeerEntry) -> DiscoveryResult<()>;

    /// Set the stored heartbeat of the row with the entry's address
    async fn update_heartbeat(&self, entry: &PeerEntry) -> DiscoveryResult<()>;

    /// All rows whose heartbeat is strictly greater than `cutoff` (epoch ms)
    async fn list_live_since(&self, cutoff: i64) -> DiscoveryResult<Vec<PeerEntry>>;
}

/// Best-effort front for a [`BrokerStore`]
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn BrokerStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn BrokerStore>) -> Self {
        Self { store }
    }

    /// Create the table. An existing table is the normal case after a restart.
    #[instrument(skip(self))]
    pub async fn init_schema(&self) {
        expect_conflict("init_schema", self.store.init_schema()).await;
    }

    /// Insert the row, ignoring a duplicate address
    #[instrument(skip(self, entry), fields(name = %entry.name, address = %entry.address))]
    pub async fn upsert(&self, entry: &PeerEntry) {
        expect_conflict("upsert", self.store.insert(entry)).await;
    }

    /// Push the entry's heartbeat to its row
    #[instrument(skip(self, entry), fields(name = %entry.name, address = %entry.address))]
    pub async fn heartbeat(&self, entry: &PeerEntry) {
        best_effort("heartbeat", self.store.update_heartbeat(entry)).await;
    }

    /// Live rows, or `None` if the registry could not be read
    #[instrument(skip(self))]
    pub async fn list_live_since(&self, cutoff: i64) -> Option<Vec<PeerEntry>> {
        best_effort("list_live_since", self.store.list_live_since(cutoff)).await
    }
}

/// Run a registry operation, logging and discarding any failure
async fn best_effort<T, F>(operation: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = DiscoveryResult<T>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(operation, error = %e, "Registry operation failed");
            None
        }
    }
}

/// Same as [`best_effort`], except that a conflict with an existing row or
/// table is the expected outcome and only logged at debug
async fn expect_conflict<F>(operation: &'static str, fut: F)
where
    F: Future<Output = DiscoveryResult<()>>,
{
    match fut.await {
        Err(e) if e.is_conflict() => {
            debug!(operation, error = %e, "Registry operation skipped");
        }
        result => {
            best_effort(operation, async move { result }).await;
        }
    }
}
