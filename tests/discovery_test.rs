//! End-to-end tests for the discovery agent
//!
//! Agents run against a shared registry and report through a listener that
//! forwards every notification into a channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc;
use tokio::time::timeout;

use dbdiscovery::models::now_millis;
use dbdiscovery::{
    AgentConfig, BrokerStore, DiscoveryAgent, DiscoveryEvent, DiscoveryListener, HostIdentity,
    InMemoryBrokerStore, NotificationKind, PeerEntry, Registry, SqlBrokerStore,
};

type Received = (NotificationKind, DiscoveryEvent);

struct ChannelListener {
    tx: mpsc::UnboundedSender<Received>,
}

#[async_trait]
impl DiscoveryListener for ChannelListener {
    async fn on_service_add(&self, event: &DiscoveryEvent) {
        let _ = self.tx.send((NotificationKind::Add, event.clone()));
    }

    async fn on_service_remove(&self, event: &DiscoveryEvent) {
        let _ = self.tx.send((NotificationKind::Remove, event.clone()));
    }
}

fn listen(agent: &DiscoveryAgent) -> mpsc::UnboundedReceiver<Received> {
    let (tx, rx) = mpsc::unbounded_channel();
    agent.set_listener(Arc::new(ChannelListener { tx }));
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Received>) -> Received {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("listener channel closed")
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Received>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "unexpected notification");
}

/// Scans only happen when a test asks for them
fn manual_config() -> AgentConfig {
    AgentConfig::default().with_scan_interval_ms(3_600_000)
}

fn agent_on(store: Arc<dyn BrokerStore>, host: &str, config: AgentConfig) -> DiscoveryAgent {
    DiscoveryAgent::with_host(config, store, HostIdentity::fixed(host))
}

#[tokio::test]
async fn test_address_round_trip_through_registry() {
    let store = Arc::new(InMemoryBrokerStore::new());
    let agent = agent_on(store.clone(), "hostA", manual_config());
    let mut rx = listen(&agent);

    agent.register_service("tcp://localhost:61616");
    agent.start().await.unwrap();

    let (kind, event) = next(&mut rx).await;
    assert_eq!(kind, NotificationKind::Add);
    assert_eq!(event.name, "lb-hostA");
    assert_eq!(event.address, "tcp://localhost:61616");

    let row = store.row("tcp://hostA:61616").await.expect("public address persisted");
    assert_eq!(row.name, "lb-hostA");
    assert!(store.row("tcp://localhost:61616").await.is_none());

    // Later cycles only refresh the heartbeat
    let before = row.last_heartbeat;
    tokio::time::sleep(Duration::from_millis(5)).await;
    agent.advertise_self().await;
    agent.reconcile().await;
    assert!(store.row("tcp://hostA:61616").await.unwrap().last_heartbeat > before);
    assert_quiet(&mut rx).await;

    agent.stop().unwrap();
}

#[tokio::test]
async fn test_two_peer_scenario_with_staleness() {
    let store = Arc::new(InMemoryBrokerStore::new());
    let agent = agent_on(store.clone(), "hostA", manual_config());
    let mut rx = listen(&agent);

    let peer_b = PeerEntry::with_heartbeat("lb-hostB", "tcp://hostB:61616", now_millis());
    store.insert(&peer_b).await.unwrap();

    agent.register_service("tcp://localhost:61616");
    agent.start().await.unwrap();

    let (kind, local) = next(&mut rx).await;
    assert_eq!((kind, local.name.as_str()), (NotificationKind::Add, "lb-hostA"));
    let (kind, added) = next(&mut rx).await;
    assert_eq!(kind, NotificationKind::Add);
    assert_eq!(added, DiscoveryEvent::new("lb-hostB", "tcp://hostB:61616"));
    assert_quiet(&mut rx).await;

    // B stops refreshing: its heartbeat is now older than max_delay
    let stale = PeerEntry::with_heartbeat("lb-hostB", "tcp://hostB:61616", now_millis() - 25_001);
    store.update_heartbeat(&stale).await.unwrap();
    agent.reconcile().await;

    let (kind, removed) = next(&mut rx).await;
    assert_eq!(kind, NotificationKind::Remove);
    assert_eq!(removed, DiscoveryEvent::new("lb-hostB", "tcp://hostB:61616"));
    assert!(agent.peer("lb-hostB").is_none());
    assert!(agent.local_peer().is_some());

    agent.reconcile().await;
    assert_quiet(&mut rx).await;

    agent.stop().unwrap();
}

#[tokio::test]
async fn test_empty_live_set_removes_every_remote_peer() {
    let store = Arc::new(InMemoryBrokerStore::new());
    let agent = agent_on(store.clone(), "hostA", manual_config());
    let mut rx = listen(&agent);

    let now = now_millis();
    for host in ["hostB", "hostC", "hostD"] {
        let peer = PeerEntry::with_heartbeat(format!("lb-{}", host), format!("tcp://{}:61616", host), now);
        store.insert(&peer).await.unwrap();
    }

    agent.register_service("tcp://localhost:61616");
    agent.start().await.unwrap();
    for _ in 0..4 {
        assert_eq!(next(&mut rx).await.0, NotificationKind::Add);
    }

    // Every row goes stale, our own included
    for host in ["hostA", "hostB", "hostC", "hostD"] {
        let stale = PeerEntry::with_heartbeat(format!("lb-{}", host), format!("tcp://{}:61616", host), 0);
        store.update_heartbeat(&stale).await.unwrap();
    }
    agent.reconcile().await;

    let mut removed = Vec::new();
    for _ in 0..3 {
        let (kind, event) = next(&mut rx).await;
        assert_eq!(kind, NotificationKind::Remove);
        removed.push(event.name);
    }
    removed.sort();
    assert_eq!(removed, vec!["lb-hostB", "lb-hostC", "lb-hostD"]);
    assert_quiet(&mut rx).await;

    let peers = agent.peers();
    assert_eq!(peers.len(), 1);
    assert!(peers[0].is_local);

    agent.stop().unwrap();
}

#[tokio::test]
async fn test_address_change_is_remove_then_add() {
    let store = Arc::new(InMemoryBrokerStore::new());
    let agent = agent_on(store.clone(), "hostA", manual_config());
    let mut rx = listen(&agent);

    store
        .insert(&PeerEntry::new("lb-hostB", "tcp://hostB:61616"))
        .await
        .unwrap();
    agent.start().await.unwrap();
    assert_eq!(next(&mut rx).await.0, NotificationKind::Add);

    // B restarts on another port, the old row ages out
    store
        .update_heartbeat(&PeerEntry::with_heartbeat("lb-hostB", "tcp://hostB:61616", 0))
        .await
        .unwrap();
    store
        .insert(&PeerEntry::new("lb-hostB", "tcp://hostB:61617"))
        .await
        .unwrap();
    agent.reconcile().await;

    let (kind, event) = next(&mut rx).await;
    assert_eq!((kind, event.address.as_str()), (NotificationKind::Remove, "tcp://hostB:61616"));
    let (kind, event) = next(&mut rx).await;
    assert_eq!((kind, event.address.as_str()), (NotificationKind::Add, "tcp://hostB:61617"));

    agent.stop().unwrap();
}

#[tokio::test]
async fn test_service_failed_removes_immediately() {
    let store = Arc::new(InMemoryBrokerStore::new());
    let agent = agent_on(store.clone(), "hostA", manual_config());
    let mut rx = listen(&agent);

    store
        .insert(&PeerEntry::new("lb-hostB", "tcp://hostB:61616"))
        .await
        .unwrap();
    agent.start().await.unwrap();
    assert_eq!(next(&mut rx).await.0, NotificationKind::Add);

    agent.service_failed(DiscoveryEvent::new("lb-hostB", "tcp://hostB:61616"));
    assert!(agent.peer("lb-hostB").is_none());

    let (kind, event) = next(&mut rx).await;
    assert_eq!(kind, NotificationKind::Remove);
    assert_eq!(event.name, "lb-hostB");

    agent.stop().unwrap();
}

#[tokio::test]
async fn test_polling_picks_up_new_peers_until_stopped() {
    let store = Arc::new(InMemoryBrokerStore::new());
    let agent = agent_on(
        store.clone(),
        "hostA",
        AgentConfig::default().with_scan_interval_ms(50),
    );
    let mut rx = listen(&agent);
    agent.start().await.unwrap();

    store
        .insert(&PeerEntry::new("lb-hostB", "tcp://hostB:61616"))
        .await
        .unwrap();
    let (kind, event) = next(&mut rx).await;
    assert_eq!((kind, event.name.as_str()), (NotificationKind::Add, "lb-hostB"));

    agent.stop().unwrap();
    store
        .insert(&PeerEntry::new("lb-hostC", "tcp://hostC:61616"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
    assert!(!agent.is_running());
}

#[tokio::test]
async fn test_scan_now_runs_an_extra_cycle() {
    let store = Arc::new(InMemoryBrokerStore::new());
    let agent = agent_on(store.clone(), "hostA", manual_config());
    let mut rx = listen(&agent);
    agent.start().await.unwrap();

    // Let the polling task settle into its wait
    tokio::time::sleep(Duration::from_millis(100)).await;
    store
        .insert(&PeerEntry::new("lb-hostB", "tcp://hostB:61616"))
        .await
        .unwrap();
    agent.scan_now();

    let (kind, event) = next(&mut rx).await;
    assert_eq!((kind, event.name.as_str()), (NotificationKind::Add, "lb-hostB"));
    assert!(agent.is_running());

    agent.stop().unwrap();
}

#[tokio::test]
async fn test_restart_keeps_local_entry() {
    let store = Arc::new(InMemoryBrokerStore::new());
    let agent = agent_on(store.clone(), "hostA", manual_config());
    let mut rx = listen(&agent);
    agent.register_service("tcp://localhost:61616");

    agent.start().await.unwrap();
    assert_eq!(next(&mut rx).await.0, NotificationKind::Add);
    agent.stop().unwrap();

    agent.start().await.unwrap();
    assert_quiet(&mut rx).await;
    assert_eq!(agent.peers().len(), 1);

    agent.stop().unwrap();
}

#[tokio::test]
async fn test_registry_staleness_filter() {
    let store = Arc::new(InMemoryBrokerStore::new());
    let registry = Registry::new(store.clone());
    registry.init_schema().await;
    registry.init_schema().await;

    let now = now_millis();
    registry
        .upsert(&PeerEntry::with_heartbeat("lb-fresh", "tcp://fresh:1", now))
        .await;
    registry
        .upsert(&PeerEntry::with_heartbeat("lb-old", "tcp://old:1", now - 25_001))
        .await;
    // Duplicate insert is swallowed
    registry
        .upsert(&PeerEntry::with_heartbeat("lb-fresh", "tcp://fresh:1", now))
        .await;

    let live = registry.list_live_since(now - 25_000).await.unwrap();
    assert_eq!(live, vec![PeerEntry::new("lb-fresh", "tcp://fresh:1")]);
}

#[tokio::test]
async fn test_two_agents_discover_each_other_over_sql() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store: Arc<dyn BrokerStore> = Arc::new(SqlBrokerStore::from_pool(pool));

    let agent_a = agent_on(store.clone(), "hostA", manual_config());
    let agent_b = agent_on(store.clone(), "hostB", manual_config());
    let mut rx_a = listen(&agent_a);
    let mut rx_b = listen(&agent_b);

    agent_a.register_service("tcp://localhost:61616");
    agent_b.register_service("tcp://localhost:61617");
    agent_a.start().await.unwrap();
    agent_b.start().await.unwrap();

    // B saw itself, then A
    assert_eq!(next(&mut rx_b).await.1.name, "lb-hostB");
    assert_eq!(
        next(&mut rx_b).await.1,
        DiscoveryEvent::new("lb-hostA", "tcp://hostA:61616")
    );

    // A learns about B on its next scan
    assert_eq!(next(&mut rx_a).await.1.name, "lb-hostA");
    agent_a.reconcile().await;
    assert_eq!(
        next(&mut rx_a).await,
        (
            NotificationKind::Add,
            DiscoveryEvent::new("lb-hostB", "tcp://hostB:61617")
        )
    );

    agent_a.stop().unwrap();
    agent_b.stop().unwrap();
}
