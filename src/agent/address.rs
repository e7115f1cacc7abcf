//! Host name resolution and the `localhost` address rewrite
//!
//! An address registered as `tcp://localhost:61616` is useless to other
//! machines, so it is published with the resolved host name instead. When
//! the agent reports an address back to its own listener, the host name is
//! turned back into `localhost` so the listener sees what it registered.

use std::sync::{Arc, OnceLock};

use tracing::warn;

pub const LOCALHOST: &str = "localhost";

/// Used when the host name cannot be resolved
pub const UNKNOWN_HOST: &str = "Unknown";

/// Prefix of the local broker key
pub const LOCAL_KEY_PREFIX: &str = "lb-";

/// Resolved host name of this process, computed once
#[derive(Debug, Clone, Default)]
pub struct HostIdentity {
    name: Arc<OnceLock<String>>,
}

impl HostIdentity {
    /// Resolve lazily from the operating system
    pub fn system() -> Self {
        Self::default()
    }

    /// Use a fixed host name
    pub fn fixed(name: impl Into<String>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(name.into());
        Self {
            name: Arc::new(cell),
        }
    }

    /// The host name. The first answer is kept, including the fallback, so
    /// the local key stays stable for the lifetime of the process.
    pub fn name(&self) -> &str {
        self.name.get_or_init(resolve_host_name)
    }

    /// Key of the local broker in the peer set and the registry
    pub fn local_key(&self) -> String {
        format!("{}{}", LOCAL_KEY_PREFIX, self.name())
    }

    pub fn publish_address(&self, address: &str) -> String {
        publish_address(address, self.name())
    }

    pub fn subscriber_address(&self, address: &str) -> String {
        subscriber_address(address, self.name())
    }
}

fn resolve_host_name() -> String {
    match hostname::get() {
        Ok(name) => match name.into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!(host = ?raw, "Host name is not valid UTF-8");
                UNKNOWN_HOST.to_string()
            }
        },
        Err(e) => {
            warn!(error = %e, "Unable to get host name");
            UNKNOWN_HOST.to_string()
        }
    }
}

/// Replace `localhost` up to the next `:` with `host`
///
/// Without a `:` after the token the rest of the address is replaced.
pub fn publish_address(address: &str, host: &str) -> String {
    let Some(start) = address.find(LOCALHOST) else {
        return address.to_string();
    };
    let end = address[start..]
        .find(':')
        .map(|offset| start + offset)
        .unwrap_or(address.len());

    format!("{}{}{}", &address[..start], host, &address[end..])
}

/// Replace every occurrence of `host` with `localhost`
pub fn subscriber_address(address: &str, host: &str) -> String {
    if host.is_empty() || !address.contains(host) {
        return address.to_string();
    }
    address.replace(host, LOCALHOST)
}
