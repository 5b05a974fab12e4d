//! HTTPS sources for signed policy documents.
//!
//! ## Endpoints
//!
//! - `GET {server}/api/info` - server version and, on newer servers, a
//!   signed policy
//! - `GET {server}/api/v1/settings.public` - workspace unique id
//! - `GET {cloud}/v2/server/supportedVersions` - vendor-cloud policy for a
//!   workspace
//!
//! Responses are returned unverified; signature checks happen in the engine.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::SupportedVersionsError;

/// Setting holding the workspace unique id.
const UNIQUE_ID_SETTING: &str = "uniqueID";

/// Response from `/api/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server version.
    pub version: String,
    /// Whether the server considered the request successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Signed policy served by the server itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_versions: Option<SignedPolicy>,
}

/// Envelope around a signed policy token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPolicy {
    /// Compact JWS.
    pub signed: String,
}

/// Response from `/api/v1/settings.public`.
#[derive(Debug, Clone, Deserialize)]
struct SettingsResponse {
    #[serde(default)]
    settings: Vec<PublicSetting>,
}

#[derive(Debug, Clone, Deserialize)]
struct PublicSetting {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    value: serde_json::Value,
}

/// Network sources the cascade consults.
#[async_trait]
pub trait PolicySources: Send + Sync {
    /// Server version and optional server-hosted policy.
    async fn fetch_server_info(&self, server_url: &str) -> Result<ServerInfo, SupportedVersionsError>;

    /// Workspace unique id.
    async fn fetch_unique_id(&self, server_url: &str) -> Result<String, SupportedVersionsError>;

    /// Vendor-cloud policy for a workspace.
    async fn fetch_cloud_policy(
        &self,
        unique_id: &str,
        domain: &str,
    ) -> Result<SignedPolicy, SupportedVersionsError>;
}

/// HTTPS client for servers and the vendor cloud.
pub struct HttpsClient {
    client: Client,
    /// Vendor cloud base URL.
    cloud_url: String,
}

impl HttpsClient {
    /// Create a new HTTPS client.
    pub fn new(cloud_url: &str, timeout: Duration) -> Result<Self, SupportedVersionsError> {
        // Fail fast on unreachable hosts; the cascade has its own retries.
        let connect_timeout = Duration::from_secs(3).min(timeout);

        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(5))
            .user_agent(format!("SupportedVersions/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SupportedVersionsError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Url::parse(cloud_url).map_err(|e| SupportedVersionsError::Config {
            message: format!("Invalid cloud endpoint {}: {}", cloud_url, e),
        })?;

        Ok(Self {
            client,
            cloud_url: cloud_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> Result<T, SupportedVersionsError> {
        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTPS request failed");
            SupportedVersionsError::network(format!("Request to {} failed: {}", url, e))
        })?;

        let status = response.status();
        debug!(url = %url, status = %status, "HTTPS: Response received");

        if !status.is_success() {
            warn!(url = %url, status = %status, "HTTPS: Non-success status");
            return Err(SupportedVersionsError::network(format!(
                "HTTP {} from {}",
                status, url
            )));
        }

        response.json::<T>().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTPS: Failed to parse JSON response");
            SupportedVersionsError::network(format!("Failed to parse response from {}: {}", url, e))
        })
    }
}

#[async_trait]
impl PolicySources for HttpsClient {
    #[instrument(skip(self))]
    async fn fetch_server_info(&self, server_url: &str) -> Result<ServerInfo, SupportedVersionsError> {
        let url = format!("{}/api/info", server_url.trim_end_matches('/'));
        let info: ServerInfo = self.get_json(self.client.get(&url), &url).await?;

        if info.success == Some(false) {
            return Err(SupportedVersionsError::network(format!(
                "{} reported success=false",
                url
            )));
        }

        info!(
            url = %url,
            version = %info.version,
            signed = info.supported_versions.is_some(),
            "HTTPS: Server info received"
        );
        Ok(info)
    }

    #[instrument(skip(self))]
    async fn fetch_unique_id(&self, server_url: &str) -> Result<String, SupportedVersionsError> {
        let url = format!("{}/api/v1/settings.public", server_url.trim_end_matches('/'));
        let query = serde_json::json!({ "_id": { "$in": [UNIQUE_ID_SETTING] } }).to_string();

        let response: SettingsResponse = self
            .get_json(self.client.get(&url).query(&[("query", query)]), &url)
            .await?;

        response
            .settings
            .into_iter()
            .find(|s| s.id == UNIQUE_ID_SETTING)
            .and_then(|s| s.value.as_str().map(str::to_string))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SupportedVersionsError::DataMissing {
                what: format!("{} setting in response from {}", UNIQUE_ID_SETTING, url),
            })
    }

    #[instrument(skip(self))]
    async fn fetch_cloud_policy(
        &self,
        unique_id: &str,
        domain: &str,
    ) -> Result<SignedPolicy, SupportedVersionsError> {
        let url = format!("{}/v2/server/supportedVersions", self.cloud_url);
        let request = self.client.get(&url).query(&[
            ("uniqueId", unique_id),
            ("domain", domain),
            ("source", "desktop"),
        ]);

        let policy: SignedPolicy = self.get_json(request, &url).await?;
        info!(url = %url, "HTTPS: Cloud policy received");
        Ok(policy)
    }
}

/// Host part of a server URL, falling back to the URL itself.
#[must_use]
pub fn server_domain(server_url: &str) -> String {
    Url::parse(server_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| server_url.to_string())
}
