//! Build an agent from a discovery URI
//!
//! Agent options travel as query parameters, e.g.
//! `dbdiscovery://default?scanInterval=5000&maxDelay=20000&databaseUrl=sqlite://brokers.db`.
//! Both the camelCase and the snake_case spelling of an option are accepted.

use url::Url;

use crate::agent::DiscoveryAgent;
use crate::config::AgentConfig;
use crate::error::{DiscoveryError, DiscoveryResult};

/// URI scheme understood by [`create_agent`]
pub const SCHEME: &str = "dbdiscovery";

impl AgentConfig {
    /// Defaults overridden by the URI's query parameters
    pub fn from_uri(uri: &str) -> DiscoveryResult<Self> {
        let url = Url::parse(uri).map_err(|e| creation_error(uri, &e.to_string()))?;
        if url.scheme() != SCHEME {
            return Err(creation_error(
                uri,
                &format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        let mut config = AgentConfig::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "scanInterval" | "scan_interval_ms" => {
                    config.scan_interval_ms = parse_millis(uri, &key, &value)?;
                }
                "maxDelay" | "max_delay_ms" => {
                    config.max_delay_ms = parse_millis(uri, &key, &value)?;
                }
                "databaseUrl" | "database_url" => {
                    config.database_url = value.into_owned();
                }
                "localService" | "local_service" => {
                    config.local_service = Some(value.into_owned());
                }
                other => {
                    return Err(creation_error(uri, &format!("unknown option '{}'", other)));
                }
            }
        }

        config
            .validate()
            .map_err(|e| creation_error(uri, &e.to_string()))?;
        Ok(config)
    }
}

/// Parse the URI and open the SQL registry it points to
pub async fn create_agent(uri: &str) -> DiscoveryResult<DiscoveryAgent> {
    let config = AgentConfig::from_uri(uri)?;
    DiscoveryAgent::connect(config).await
}

fn parse_millis(uri: &str, key: &str, value: &str) -> DiscoveryResult<u64> {
    value
        .parse::<u64>()
        .map_err(|_| creation_error(uri, &format!("option '{}' is not a number: '{}'", key, value)))
}

fn creation_error(uri: &str, reason: &str) -> DiscoveryError {
    DiscoveryError::config(&format!("Could not create discovery agent: {} ({})", uri, reason))
}
