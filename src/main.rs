use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dbdiscovery::{AgentConfig, DiscoveryAgent, DiscoveryEvent, DiscoveryListener};

/// Logs every broker that joins or leaves
struct LoggingListener;

#[async_trait]
impl DiscoveryListener for LoggingListener {
    async fn on_service_add(&self, event: &DiscoveryEvent) {
        tracing::info!(name = %event.name, address = %event.address, "Broker added");
    }

    async fn on_service_remove(&self, event: &DiscoveryEvent) {
        tracing::info!(name = %event.name, address = %event.address, "Broker removed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting discovery agent");

    // Load configuration
    let config = AgentConfig::load()?;
    tracing::info!(database_url = %config.database_url, "Configuration loaded");

    if config.local_service.is_none() {
        tracing::warn!("DISCOVERY_LOCAL_SERVICE not set, this process will only observe peers");
    }

    let agent = DiscoveryAgent::connect(config).await?;
    agent.set_listener(Arc::new(LoggingListener));
    agent.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    agent.stop()?;

    let peers = serde_json::to_string(&agent.peers())?;
    tracing::debug!(%peers, "Known peers at shutdown");

    Ok(())
}
