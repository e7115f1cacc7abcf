//! Error types for the discovery agent
//!
//! Registry failures during normal operation are absorbed by the
//! [`Registry`](crate::registry::Registry) policy and never reach the host.
//! What is left here are the failures a host process has to deal with:
//! bad configuration, a registry that cannot be opened, or an agent started
//! outside of a tokio runtime.

use thiserror::Error;

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The broker registry could not be reached or queried
    #[error("Registry error: {0}")]
    Registry(#[from] sqlx::Error),

    /// A row or table that already exists
    #[error("Registry conflict: {0}")]
    Conflict(String),

    /// The agent needs a tokio runtime to run its background tasks
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl DiscoveryError {
    pub fn config(msg: &str) -> Self {
        DiscoveryError::Config(msg.to_string())
    }

    pub fn conflict(msg: &str) -> Self {
        DiscoveryError::Conflict(msg.to_string())
    }

    pub fn runtime(msg: &str) -> Self {
        DiscoveryError::Runtime(msg.to_string())
    }

    /// A duplicate row or an existing table, as opposed to a registry that
    /// cannot be reached
    pub fn is_conflict(&self) -> bool {
        match self {
            DiscoveryError::Conflict(_) => true,
            DiscoveryError::Registry(sqlx::Error::Database(e)) => {
                e.is_unique_violation() || e.message().contains("already exists")
            }
            _ => false,
        }
    }
}

impl From<config::ConfigError> for DiscoveryError {
    fn from(e: config::ConfigError) -> Self {
        DiscoveryError::Config(e.to_string())
    }
}

impl From<std::io::Error> for DiscoveryError {
    fn from(e: std::io::Error) -> Self {
        DiscoveryError::Config(format!("Failed to prepare database file: {}", e))
    }
}
