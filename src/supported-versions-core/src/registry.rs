//! Server registry boundary.
//!
//! The registry of connected servers is owned by the host application. The
//! core only reads a server's current facts and writes back what it
//! discovers (version, unique id) plus a consecutive-failure counter.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identity and known facts about a connected server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRef {
    /// Server base URL.
    pub url: String,
    /// Server version, once discovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Workspace unique id, once discovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Consecutive failed version checks.
    #[serde(default)]
    pub version_check_failure_count: u32,
}

impl ServerRef {
    /// A server known only by URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Access to the host application's server list.
pub trait ServerRegistry: Send + Sync {
    /// Current facts about the server at `url`.
    fn get(&self, url: &str) -> Option<ServerRef>;

    /// Record a discovered server version.
    fn set_version(&self, url: &str, version: &str);

    /// Record a discovered workspace unique id.
    fn set_unique_id(&self, url: &str, unique_id: &str);

    /// Bump the consecutive failure counter, returning the new value.
    fn increment_failure_count(&self, url: &str) -> u32;

    /// Reset the consecutive failure counter.
    fn reset_failure_count(&self, url: &str);
}

/// In-process registry used by the CLI and tests.
#[derive(Debug, Default)]
pub struct InMemoryServerRegistry {
    servers: RwLock<HashMap<String, ServerRef>>,
}

impl InMemoryServerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a server.
    pub fn insert(&self, server: ServerRef) {
        if let Ok(mut servers) = self.servers.write() {
            servers.insert(server.url.clone(), server);
        }
    }

    /// Remove a server.
    pub fn remove(&self, url: &str) -> Option<ServerRef> {
        self.servers.write().ok().and_then(|mut s| s.remove(url))
    }

    /// Snapshot of all servers.
    pub fn servers(&self) -> Vec<ServerRef> {
        self.servers
            .read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    fn update(&self, url: &str, f: impl FnOnce(&mut ServerRef)) -> bool {
        match self.servers.write() {
            Ok(mut servers) => match servers.get_mut(url) {
                Some(server) => {
                    f(server);
                    true
                },
                None => false,
            },
            Err(_) => false,
        }
    }
}

impl ServerRegistry for InMemoryServerRegistry {
    fn get(&self, url: &str) -> Option<ServerRef> {
        self.servers.read().ok().and_then(|s| s.get(url).cloned())
    }

    fn set_version(&self, url: &str, version: &str) {
        if !self.update(url, |s| s.version = Some(version.to_string())) {
            debug!(url = %url, "Registry: version for unknown server ignored");
        }
    }

    fn set_unique_id(&self, url: &str, unique_id: &str) {
        if !self.update(url, |s| s.unique_id = Some(unique_id.to_string())) {
            debug!(url = %url, "Registry: unique id for unknown server ignored");
        }
    }

    fn increment_failure_count(&self, url: &str) -> u32 {
        let mut count = 0;
        self.update(url, |s| {
            s.version_check_failure_count = s.version_check_failure_count.saturating_add(1);
            count = s.version_check_failure_count;
        });
        count
    }

    fn reset_failure_count(&self, url: &str) {
        self.update(url, |s| s.version_check_failure_count = 0);
    }
}
