use std::time::Duration;

use serde::Deserialize;

use crate::error::{DiscoveryError, DiscoveryResult};

/// Environment variable prefix, e.g. `DISCOVERY_SCAN_INTERVAL_MS`
pub const ENV_PREFIX: &str = "DISCOVERY";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    /// Time between two scans of the registry
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// A broker whose last heartbeat is older than this is considered gone
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Address this process advertises, if any
    #[serde(default)]
    pub local_service: Option<String>,
}

fn default_scan_interval_ms() -> u64 {
    10_000
}

fn default_max_delay_ms() -> u64 {
    25_000
}

fn default_database_url() -> String {
    "sqlite://brokers.db".to_string()
}

impl AgentConfig {
    /// Load from `DISCOVERY_*` environment variables, after reading `.env` if present
    pub fn load() -> DiscoveryResult<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?;

        let settings: AgentConfig = config.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> DiscoveryResult<()> {
        if self.scan_interval_ms == 0 {
            return Err(DiscoveryError::config("scan_interval_ms must be greater than 0"));
        }
        if self.database_url.trim().is_empty() {
            return Err(DiscoveryError::config("database_url must not be empty"));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn with_scan_interval_ms(mut self, scan_interval_ms: u64) -> Self {
        self.scan_interval_ms = scan_interval_ms;
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_database_url(mut self, database_url: impl Into<String>) -> Self {
        self.database_url = database_url.into();
        self
    }

    pub fn with_local_service(mut self, local_service: impl Into<String>) -> Self {
        self.local_service = Some(local_service.into());
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_scan_interval_ms(),
            max_delay_ms: default_max_delay_ms(),
            database_url: default_database_url(),
            local_service: None,
        }
    }
}
