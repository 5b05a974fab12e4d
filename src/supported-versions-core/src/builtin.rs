//! Bundled fallback policy.
//!
//! The application ships a pre-signed policy token, compiled into the binary
//! unless a file override is configured. It is read and verified on first
//! use and the result, including "nothing usable", is kept for the rest of
//! the process.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::BuiltinSource;
use crate::error::SupportedVersionsError;
use crate::jwt::PolicyVerifier;
use crate::policy::PolicyDocument;

/// Signed policy token shipped with the application.
const BUNDLED_TOKEN: &str = include_str!("../resources/supportedVersions.jwt");

/// Lazily loaded bundled policy.
pub struct BuiltinPolicy {
    source: BuiltinSource,
    verifier: PolicyVerifier,
    loaded: OnceCell<Option<Arc<PolicyDocument>>>,
}

impl BuiltinPolicy {
    /// Loader for the token described by `source`.
    pub fn new(source: BuiltinSource, verifier: PolicyVerifier) -> Self {
        Self {
            source,
            verifier,
            loaded: OnceCell::new(),
        }
    }

    /// The bundled document, if one could be read and verified.
    pub async fn get(&self) -> Option<Arc<PolicyDocument>> {
        self.loaded
            .get_or_init(|| async {
                match self.load().await {
                    Ok(doc) => doc.map(Arc::new),
                    Err(e) => {
                        warn!(error = %e, "Builtin: no bundled policy available");
                        None
                    },
                }
            })
            .await
            .clone()
    }

    /// Whether the bundled token has been read yet.
    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    async fn load(&self) -> Result<Option<PolicyDocument>, SupportedVersionsError> {
        let token = match &self.source {
            BuiltinSource::Disabled => return Ok(None),
            BuiltinSource::Bundled => BUNDLED_TOKEN.to_string(),
            BuiltinSource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                SupportedVersionsError::Builtin {
                    message: format!("Failed to read {}: {}", path.display(), e),
                }
            })?,
        };

        let doc = self.verifier.decode(token.trim())?;
        info!(
            source = ?self.source,
            timestamp = %doc.timestamp,
            "Builtin: bundled policy verified"
        );
        Ok(Some(doc))
    }
}
