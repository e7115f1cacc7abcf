//! Discovery agent
//!
//! Each cycle the agent writes its own heartbeat into the registry, reads
//! back every broker that is still alive, and reconciles that snapshot with
//! the peers it already knows. Differences become add/remove notifications
//! delivered by the [`EventNotifier`].
//!
//! - The local entry is created once, then only its heartbeat is refreshed
//! - Removals are applied before additions within a cycle
//! - If the registry is unreachable the current view is kept as is

mod address;
mod lifecycle;
mod reconcile;

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace};

use crate::config::AgentConfig;
use crate::error::DiscoveryResult;
use crate::models::{now_millis, DiscoveryEvent, PeerEntry};
use crate::notifier::{DiscoveryListener, EventNotifier};
use crate::peers::PeerSet;
use crate::registry::{BrokerStore, Registry, SqlBrokerStore};

pub use address::{
    publish_address, subscriber_address, HostIdentity, LOCALHOST, LOCAL_KEY_PREFIX, UNKNOWN_HOST,
};
pub use lifecycle::{AgentState, Lifecycle, Wait};
pub use reconcile::{ReconcilePlan, ReconcileReport};

/// Handle to a discovery agent. Clones share the same agent.
#[derive(Clone)]
pub struct DiscoveryAgent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    config: AgentConfig,
    registry: Registry,
    peers: PeerSet,
    notifier: EventNotifier,
    host: HostIdentity,
    lifecycle: Lifecycle,
    self_service: RwLock<Option<String>>,
    advertise_lock: Mutex<()>,
}

impl DiscoveryAgent {
    pub fn new(config: AgentConfig, store: Arc<dyn BrokerStore>) -> Self {
        Self::with_host(config, store, HostIdentity::system())
    }

    pub fn with_host(config: AgentConfig, store: Arc<dyn BrokerStore>, host: HostIdentity) -> Self {
        let lifecycle = Lifecycle::new();
        let self_service = RwLock::new(config.local_service.clone());

        Self {
            inner: Arc::new(AgentInner {
                registry: Registry::new(store),
                peers: PeerSet::new(),
                notifier: EventNotifier::new(lifecycle.clone(), host.clone()),
                host,
                lifecycle,
                self_service,
                advertise_lock: Mutex::new(()),
                config,
            }),
        }
    }

    /// Open the SQL registry named by `config.database_url`
    pub async fn connect(config: AgentConfig) -> DiscoveryResult<Self> {
        config.validate()?;
        let store = SqlBrokerStore::connect(&config.database_url).await?;
        Ok(Self::new(config, Arc::new(store)))
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    pub fn state(&self) -> AgentState {
        self.inner.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.is_running()
    }

    pub fn host(&self) -> &HostIdentity {
        &self.inner.host
    }

    /// Name under which this process is registered
    pub fn local_key(&self) -> String {
        self.inner.host.local_key()
    }

    /// Every known broker, the local one included
    pub fn peers(&self) -> Vec<PeerEntry> {
        self.inner.peers.snapshot()
    }

    pub fn peer(&self, name: &str) -> Option<PeerEntry> {
        self.inner.peers.get(name)
    }

    pub fn local_peer(&self) -> Option<PeerEntry> {
        self.inner.peers.local()
    }

    /// Notifications queued but not yet handed to the listener
    pub fn pending_notifications(&self) -> usize {
        self.inner.notifier.pending()
    }

    /// Declare the address this process advertises
    pub fn register_service(&self, address: impl Into<String>) {
        let address = address.into();
        trace!(%address, "Register local service");
        *self.inner.self_service.write() = Some(address);
    }

    /// Install the listener. Notifications already queued go to this one.
    pub fn set_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        trace!("Set discovery listener");
        self.inner.notifier.listener().set(listener);
    }

    pub fn clear_listener(&self) {
        self.inner.notifier.listener().clear();
    }

    /// Start advertising and scanning. Does nothing if already started.
    #[instrument(skip(self), fields(local_key = %self.local_key()))]
    pub async fn start(&self) -> DiscoveryResult<()> {
        let Some(generation) = self.inner.lifecycle.begin_start() else {
            debug!("Discovery agent already started");
            return Ok(());
        };

        if let Err(e) = self.inner.notifier.spawn_worker() {
            self.inner.lifecycle.abort_start();
            return Err(e);
        }

        info!(
            scan_interval_ms = self.inner.config.scan_interval_ms,
            max_delay_ms = self.inner.config.max_delay_ms,
            "Starting discovery agent"
        );

        self.inner.registry.init_schema().await;
        self.inner.advertise_self().await;
        self.inner.reconcile().await;

        tokio::spawn(poll(
            Arc::downgrade(&self.inner),
            self.inner.lifecycle.clone(),
            generation,
        ));

        if self.inner.lifecycle.finish_start() {
            info!("Discovery agent running");
        }
        Ok(())
    }

    /// Stop scanning. The polling task exits at its next check.
    pub fn stop(&self) -> DiscoveryResult<()> {
        if self.inner.lifecycle.begin_stop() {
            self.inner.lifecycle.interrupt();
            self.inner.lifecycle.finish_stop();
            info!(local_key = %self.local_key(), "Discovery agent stopped");
        } else {
            debug!("Discovery agent already stopped");
        }
        Ok(())
    }

    /// Cut the current polling wait short so the next cycle runs now
    pub fn scan_now(&self) {
        self.inner.lifecycle.interrupt();
    }

    /// A broker reported as failed from outside the scan: forget it now
    pub fn service_failed(&self, event: DiscoveryEvent) {
        info!(name = %event.name, address = %event.address, "Service failed");
        self.inner.peers.remove(&event.name);
        self.inner.notifier.service_removed(event);
    }

    /// Write this process into the registry, creating the local entry the first time
    pub async fn advertise_self(&self) {
        self.inner.advertise_self().await;
    }

    /// Diff the live registry rows against the known peers and apply the result
    pub async fn reconcile(&self) -> ReconcileReport {
        self.inner.reconcile().await
    }
}

impl std::fmt::Debug for DiscoveryAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryAgent")
            .field("local_key", &self.local_key())
            .field("state", &self.state())
            .field("peers", &self.inner.peers.len())
            .finish()
    }
}

impl AgentInner {
    async fn advertise_self(&self) {
        let _guard = self.advertise_lock.lock().await;

        let Some(service) = self.self_service.read().clone() else {
            return;
        };
        let key = self.host.local_key();

        if self.peers.get(&key).is_some_and(|peer| peer.is_local) {
            if let Some(local) = self.peers.touch(&key) {
                self.registry.heartbeat(&local).await;
            }
            return;
        }

        let local = PeerEntry::local(&key, &service);
        self.peers.upsert(local.clone());
        self.notifier.service_added(&local);
        trace!(%local, "Advertised local broker");

        let public = PeerEntry::local(&key, self.host.publish_address(&service));
        self.registry.upsert(&public).await;
        self.registry.heartbeat(&public).await;

        info!(name = %public.name, address = %public.address, "Registered local broker");
        self.peers.upsert(public);
    }

    async fn reconcile(&self) -> ReconcileReport {
        let max_delay = i64::try_from(self.config.max_delay().as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(max_delay);

        let Some(live) = self.registry.list_live_since(cutoff).await else {
            debug!("Registry unavailable, keeping current peers");
            return ReconcileReport {
                skipped: true,
                ..Default::default()
            };
        };

        let known = self.peers.snapshot();
        let plan = ReconcilePlan::compute(&known, live);
        let mut report = ReconcileReport::default();

        for peer in plan.remove {
            if self.peers.remove_exact(&peer) {
                trace!(%peer, "Delete broker");
                self.notifier.service_removed(peer.event());
                report.removed.push(peer);
            }
        }

        for peer in plan.add {
            if self.peers.insert_if_absent(peer.clone()) {
                trace!(%peer, "Add broker");
                self.notifier.service_added(&peer);
                report.added.push(peer);
            }
        }

        if !report.added.is_empty() || !report.removed.is_empty() {
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                peers = self.peers.len(),
                "Peer set updated"
            );
        }

        report
    }
}

/// Body of the polling task: advertise, reconcile, wait, until stopped
async fn poll(inner: Weak<AgentInner>, lifecycle: Lifecycle, generation: u64) {
    debug!(generation, "Polling task started");

    loop {
        if !lifecycle.is_current(generation) {
            break;
        }
        let Some(agent) = inner.upgrade() else {
            break;
        };

        agent.advertise_self().await;
        agent.reconcile().await;
        let interval = agent.config.scan_interval();
        drop(agent);

        if lifecycle.wait(generation, interval).await == Wait::Interrupted {
            debug!(generation, "Scan wait interrupted");
        }
    }

    debug!(generation, "Polling task stopped");
}
