use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::BrokerStore;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::models::PeerEntry;

/// Broker registry held in process memory
///
/// Useful when every agent lives in the same process, and in tests. Mirrors
/// the SQL store's semantics, including the conflict errors.
#[derive(Debug, Default)]
pub struct InMemoryBrokerStore {
    initialized: RwLock<bool>,
    rows: RwLock<HashMap<String, PeerEntry>>,
}

impl InMemoryBrokerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current row for an address
    pub async fn row(&self, address: &str) -> Option<PeerEntry> {
        self.rows.read().await.get(address).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl BrokerStore for InMemoryBrokerStore {
    async fn init_schema(&self) -> DiscoveryResult<()> {
        let mut initialized = self.initialized.write().await;
        if *initialized {
            return Err(DiscoveryError::conflict("table brokers already exists"));
        }
        *initialized = true;
        Ok(())
    }

    async fn insert(&self, entry: &PeerEntry) -> DiscoveryResult<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&entry.address) {
            return Err(DiscoveryError::conflict(&format!(
                "duplicate broker address: {}",
                entry.address
            )));
        }
        let mut row = entry.clone();
        row.is_local = false;
        rows.insert(entry.address.clone(), row);
        Ok(())
    }

    async fn update_heartbeat(&self, entry: &PeerEntry) -> DiscoveryResult<()> {
        if let Some(row) = self.rows.write().await.get_mut(&entry.address) {
            row.last_heartbeat = entry.last_heartbeat;
        }
        Ok(())
    }

    async fn list_live_since(&self, cutoff: i64) -> DiscoveryResult<Vec<PeerEntry>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|row| row.last_heartbeat > cutoff)
            .cloned()
            .collect())
    }
}
