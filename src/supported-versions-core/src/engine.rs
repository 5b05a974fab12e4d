//! Supported-versions cascade.
//!
//! This module implements the data flow for one server:
//! 1. Server info (`/api/info`), which may carry a signed policy
//! 2. Workspace unique id
//! 3. Vendor-cloud policy for that workspace
//! 4. Last verified policy from the cache
//! 5. Bundled policy
//!
//! ## Security Properties
//!
//! - Every document is signature-checked before it is cached or emitted
//! - A verified server response ends the cascade
//! - Falling back to cached or bundled data always emits an error event so
//!   the UI can show staleness

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::builtin::BuiltinPolicy;
use crate::cache::PolicyCache;
use crate::config::SupportedVersionsConfig;
use crate::error::SupportedVersionsError;
use crate::evaluator::{evaluate, SupportVerdict};
use crate::events::{EventSink, SupportedVersionsEvent};
use crate::https::{server_domain, HttpsClient, PolicySources};
use crate::jwt::PolicyVerifier;
use crate::message::{render_message, MessageContext, RenderedMessage};
use crate::policy::{PolicyDocument, PolicySource};
use crate::registry::ServerRegistry;

/// How a cascade run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOutcome {
    /// The URL is not in the registry; nothing was done.
    UnknownServer,
    /// A freshly verified document from this source is in effect.
    Fresh(PolicySource),
    /// No fresh document; a cached or bundled one from this source is served.
    Fallback(PolicySource),
    /// No document at all.
    Unavailable,
}

impl CascadeOutcome {
    /// Whether a freshly fetched, verified document was obtained.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Support status of one server, ready for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Server URL.
    pub url: String,
    /// Known server version.
    pub version: Option<String>,
    /// Whether the version is supported.
    pub supported: bool,
    /// Expiration the verdict was derived from.
    pub expiration: Option<DateTime<Utc>>,
    /// Source of the document evaluated against.
    pub source: Option<PolicySource>,
    /// Warning to show, if any.
    pub message: Option<RenderedMessage>,
}

/// Orchestrates policy retrieval for registered servers.
pub struct SupportedVersionsEngine {
    /// Configuration.
    config: SupportedVersionsConfig,
    /// Host application's server list.
    registry: Arc<dyn ServerRegistry>,
    /// Network sources.
    sources: Arc<dyn PolicySources>,
    /// Token verifier shared by every source.
    verifier: PolicyVerifier,
    /// Last verified document per server.
    cache: PolicyCache,
    /// Bundled fallback document.
    builtin: BuiltinPolicy,
    /// Outbound events.
    events: Arc<dyn EventSink>,
}

impl SupportedVersionsEngine {
    /// Create an engine that talks HTTPS and trusts the embedded vendor key.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client or the embedded key cannot be set up.
    pub fn new(
        config: SupportedVersionsConfig,
        registry: Arc<dyn ServerRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, SupportedVersionsError> {
        info!(
            cloud = %config.cloud_endpoint,
            timeout_secs = config.timeout.as_secs(),
            cache_file = ?config.cache_file,
            builtin = ?config.builtin,
            "SupportedVersionsEngine: starting initialization"
        );

        let sources = Arc::new(HttpsClient::new(&config.cloud_endpoint, config.timeout)?);
        let verifier = PolicyVerifier::embedded().map_err(|e| SupportedVersionsError::Config {
            message: format!("Embedded verification key unusable: {}", e),
        })?;

        Ok(Self::with_sources(config, registry, sources, verifier, events))
    }

    /// Create an engine with explicit sources and verifier.
    pub fn with_sources(
        config: SupportedVersionsConfig,
        registry: Arc<dyn ServerRegistry>,
        sources: Arc<dyn PolicySources>,
        verifier: PolicyVerifier,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let cache = match &config.cache_file {
            Some(path) => PolicyCache::with_file(path.clone()),
            None => PolicyCache::in_memory(),
        };
        let builtin = BuiltinPolicy::new(config.builtin.clone(), verifier.clone());

        Self {
            config,
            registry,
            sources,
            verifier,
            cache,
            builtin,
            events,
        }
    }

    /// Run the cascade for `url`, emitting events as facts are discovered.
    ///
    /// Never fails; every problem is logged and reflected in the outcome.
    #[instrument(skip(self))]
    pub async fn update_supported_versions_data(&self, url: &str) -> CascadeOutcome {
        if self.registry.get(url).is_none() {
            debug!(url = %url, "Engine: unknown server, skipping");
            return CascadeOutcome::UnknownServer;
        }

        self.emit(SupportedVersionsEvent::Loading {
            url: url.to_string(),
        });

        // Server
        let info = self
            .with_retries("server info", url, || self.sources.fetch_server_info(url))
            .await;
        if let Some(info) = info {
            self.registry.set_version(url, &info.version);
            self.emit(SupportedVersionsEvent::VersionUpdated {
                url: url.to_string(),
                version: info.version.clone(),
            });

            if let Some(signed) = &info.supported_versions {
                if let Some(doc) = self.verify(url, &signed.signed, PolicySource::Server) {
                    return self.publish_fresh(url, doc, PolicySource::Server);
                }
            }
        }

        // Unique id, single attempt
        let unique_id = match self.sources.fetch_unique_id(url).await {
            Ok(unique_id) => {
                self.registry.set_unique_id(url, &unique_id);
                self.emit(SupportedVersionsEvent::UniqueIdUpdated {
                    url: url.to_string(),
                    unique_id: unique_id.clone(),
                });
                Some(unique_id)
            },
            Err(e) => {
                warn!(url = %url, error = %e, "Engine: unique id unavailable, skipping cloud");
                None
            },
        };

        // Cloud
        if let Some(unique_id) = unique_id {
            let domain = server_domain(url);
            let policy = self
                .with_retries("cloud policy", url, || {
                    self.sources.fetch_cloud_policy(&unique_id, &domain)
                })
                .await;
            if let Some(policy) = policy {
                if let Some(doc) = self.verify(url, &policy.signed, PolicySource::Cloud) {
                    return self.publish_fresh(url, doc, PolicySource::Cloud);
                }
            }
        }

        // Cache
        if let Some(entry) = self.cache.get(url) {
            info!(
                url = %url,
                origin = %entry.source,
                cached_at = entry.cached_at,
                "Engine: serving cached policy"
            );
            self.emit(SupportedVersionsEvent::SupportedVersionsUpdated {
                url: url.to_string(),
                supported_versions: entry.document,
                source: PolicySource::Cloud,
                cached_origin: Some(entry.source),
            });
            self.emit_error(url);
            return CascadeOutcome::Fallback(entry.source);
        }

        // Builtin
        if let Some(doc) = self.builtin.get().await {
            info!(url = %url, "Engine: serving bundled policy");
            self.cache.put(url, &doc, PolicySource::Builtin);
            self.emit(SupportedVersionsEvent::SupportedVersionsUpdated {
                url: url.to_string(),
                supported_versions: (*doc).clone(),
                source: PolicySource::Builtin,
                cached_origin: None,
            });
            self.emit_error(url);
            return CascadeOutcome::Fallback(PolicySource::Builtin);
        }

        warn!(url = %url, "Engine: no policy available from any source");
        self.emit_error(url);
        CascadeOutcome::Unavailable
    }

    /// Evaluate `url` against the document currently in effect.
    pub async fn support_status(&self, url: &str) -> Option<SupportVerdict> {
        self.support_status_at(url, Utc::now()).await
    }

    /// Evaluate `url` as of `now`.
    ///
    /// Returns `None` for servers not in the registry.
    pub async fn support_status_at(
        &self,
        url: &str,
        now: DateTime<Utc>,
    ) -> Option<SupportVerdict> {
        let server = self.registry.get(url)?;
        let builtin = self.builtin.get().await;
        let cached = self.cache.get(url);
        let doc = cached.as_ref().map(|e| &e.document).or(builtin.as_deref());

        Some(evaluate(&server, doc, builtin.as_deref(), now))
    }

    /// Full status for display, with the warning rendered for `language`.
    pub async fn status_report(
        &self,
        url: &str,
        language: &str,
        now: DateTime<Utc>,
    ) -> Option<StatusReport> {
        let server = self.registry.get(url)?;
        let builtin = self.builtin.get().await;
        let cached = self.cache.get(url);

        let (doc, source) = match &cached {
            Some(entry) => (Some(&entry.document), Some(entry.source)),
            None => (
                builtin.as_deref(),
                builtin.as_ref().map(|_| PolicySource::Builtin),
            ),
        };

        let verdict = evaluate(&server, doc, builtin.as_deref(), now);
        let message = verdict.message.as_ref().map(|message| {
            let context = MessageContext {
                workspace_name: server_domain(url),
                domain: server_domain(url),
                version: server.version.clone().unwrap_or_default(),
                remaining_days: verdict
                    .expiration
                    .map(|e| (e - now).num_days().max(0))
                    .unwrap_or(0),
            };
            let i18n = doc
                .and_then(|d| d.i18n.as_ref())
                .or_else(|| builtin.as_ref().and_then(|b| b.i18n.as_ref()));
            render_message(message, i18n, language, &context)
        });

        Some(StatusReport {
            url: url.to_string(),
            version: server.version,
            supported: verdict.supported,
            expiration: verdict.expiration,
            source,
            message,
        })
    }

    /// Policy cache.
    pub fn cache(&self) -> &PolicyCache {
        &self.cache
    }

    /// Bundled policy loader.
    pub fn builtin(&self) -> &BuiltinPolicy {
        &self.builtin
    }

    /// Server registry.
    pub fn registry(&self) -> &Arc<dyn ServerRegistry> {
        &self.registry
    }

    /// Current configuration.
    pub fn config(&self) -> &SupportedVersionsConfig {
        &self.config
    }

    /// Run `fetch` up to `fetch_attempts` times with a fixed delay between
    /// attempts. Exhaustion is logged, not raised.
    async fn with_retries<T, F, Fut>(&self, what: &str, url: &str, mut fetch: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SupportedVersionsError>>,
    {
        let attempts = self.config.fetch_attempts.max(1);

        for attempt in 1..=attempts {
            match fetch().await {
                Ok(value) => return Some(value),
                Err(e) => {
                    warn!(
                        url = %url,
                        what,
                        attempt,
                        attempts,
                        error = %e,
                        "Engine: fetch failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.fetch_retry_delay).await;
                    }
                },
            }
        }

        debug!(url = %url, what, "Engine: attempts exhausted");
        None
    }

    fn verify(&self, url: &str, token: &str, source: PolicySource) -> Option<PolicyDocument> {
        match self.verifier.decode(token) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(
                    url = %url,
                    source = %source,
                    error = %e,
                    "Engine: policy rejected, discarding"
                );
                None
            },
        }
    }

    fn publish_fresh(
        &self,
        url: &str,
        doc: PolicyDocument,
        source: PolicySource,
    ) -> CascadeOutcome {
        info!(
            url = %url,
            source = %source,
            timestamp = %doc.timestamp,
            "Engine: verified policy in effect"
        );
        self.cache.put(url, &doc, source);
        self.emit(SupportedVersionsEvent::SupportedVersionsUpdated {
            url: url.to_string(),
            supported_versions: doc,
            source,
            cached_origin: None,
        });
        CascadeOutcome::Fresh(source)
    }

    fn emit_error(&self, url: &str) {
        self.emit(SupportedVersionsEvent::SupportedVersionsError {
            url: url.to_string(),
        });
    }

    fn emit(&self, event: SupportedVersionsEvent) {
        self.events.emit(event);
    }
}
