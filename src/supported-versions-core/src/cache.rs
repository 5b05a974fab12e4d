//! Policy cache with file-backed persistence.
//!
//! Holds the last verified policy document per server, keyed
//! `supportedVersions:<url>`. Entries live in memory and, when a cache file
//! is configured, in a single JSON document on disk that is loaded at
//! startup and rewritten on every change. Disk failures are logged and never
//! fatal; the in-memory copy stays authoritative.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::SupportedVersionsError;
use crate::policy::{PolicyDocument, PolicySource};

/// Key prefix for cache entries.
const KEY_PREFIX: &str = "supportedVersions:";

/// Last verified policy per server.
pub struct PolicyCache {
    /// In-memory entries.
    memory: RwLock<HashMap<String, CacheEntry>>,
    /// Storage backend (optional).
    storage: Option<StorageBackend>,
}

/// A cached policy entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The verified document.
    pub document: PolicyDocument,
    /// Where the document was fetched from.
    pub source: PolicySource,
    /// When the entry was written (Unix seconds).
    pub cached_at: i64,
}

/// Storage backend for persistent cache.
struct StorageBackend {
    /// Path to the cache file.
    path: PathBuf,
}

impl PolicyCache {
    /// Memory-only cache.
    pub fn in_memory() -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            storage: None,
        }
    }

    /// Cache persisted to `path`. Existing entries are loaded.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        let storage = StorageBackend { path: path.into() };
        let entries = storage.load();
        debug!(
            path = %storage.path.display(),
            entries = entries.len(),
            "Cache: loaded policy cache"
        );

        Self {
            memory: RwLock::new(entries),
            storage: Some(storage),
        }
    }

    /// Cache key for a server URL.
    #[must_use]
    pub fn key_for(url: &str) -> String {
        format!("{}{}", KEY_PREFIX, url)
    }

    /// Last verified document for `url`.
    pub fn get(&self, url: &str) -> Option<CacheEntry> {
        self.memory
            .read()
            .ok()
            .and_then(|cache| cache.get(&Self::key_for(url)).cloned())
    }

    /// Store a verified document for `url`, replacing any previous one.
    pub fn put(&self, url: &str, document: &PolicyDocument, source: PolicySource) {
        let entry = CacheEntry {
            document: document.clone(),
            source,
            cached_at: current_timestamp(),
        };

        match self.memory.write() {
            Ok(mut cache) => {
                cache.insert(Self::key_for(url), entry);
            },
            Err(_) => {
                warn!(url = %url, "Cache: lock poisoned, entry not stored");
                return;
            },
        }

        trace!(url = %url, source = %source, "Cache: stored policy");
        self.persist();
    }

    /// Remove the entry for `url`.
    pub fn invalidate(&self, url: &str) {
        if let Ok(mut cache) = self.memory.write() {
            cache.remove(&Self::key_for(url));
        }
        self.persist();
    }

    /// Remove every entry.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.memory.write() {
            cache.clear();
        }
        self.persist();
    }

    /// Number of cached servers.
    pub fn len(&self) -> usize {
        self.memory.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };

        let snapshot = match self.memory.read() {
            Ok(cache) => cache.clone(),
            Err(_) => return,
        };

        if let Err(e) = storage.save(&snapshot) {
            warn!(path = %storage.path.display(), error = %e, "Cache: failed to persist");
        }
    }
}

impl StorageBackend {
    fn load(&self) -> HashMap<String, CacheEntry> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) => {
                debug!("Cache: no cache file ({})", e);
                return HashMap::new();
            },
        };

        match serde_json::from_slice(&data) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "Cache: ignoring unreadable cache file: {}", e
                );
                HashMap::new()
            },
        }
    }

    /// Write the whole map via a temp file and rename.
    fn save(&self, entries: &HashMap<String, CacheEntry>) -> Result<(), SupportedVersionsError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| cache_error(dir, e))?;
        }

        let data = serde_json::to_vec_pretty(entries).map_err(|e| SupportedVersionsError::Cache {
            message: format!("Failed to serialize cache: {}", e),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &data).map_err(|e| cache_error(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| cache_error(&self.path, e))?;
        Ok(())
    }
}

fn cache_error(path: &Path, err: std::io::Error) -> SupportedVersionsError {
    SupportedVersionsError::Cache {
        message: format!("{}: {}", path.display(), err),
    }
}

/// Get current Unix timestamp.
fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
