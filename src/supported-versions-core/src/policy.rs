//! Supported-versions policy document.
//!
//! The decoded, trusted payload of a signed policy token. Field names follow
//! the vendor's JSON (camelCase). A document only ever comes out of
//! [`crate::jwt::PolicyVerifier`]; it is never edited after that, only
//! replaced by a newer one.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signed policy describing supported version ranges and enforcement timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    /// When the vendor issued this document.
    pub timestamp: String,
    /// Supported versions. `None` when the document carries no list at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<VersionEntry>>,
    /// Workspace-scoped override evaluated before `versions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceptions: Option<Exception>,
    /// Moment after which an unmatched version is hard-unsupported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforcement_start_date: Option<DateTime<Utc>>,
    /// Document-wide warning tiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    /// Language tag -> template key -> text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i18n: Option<HashMap<String, HashMap<String, String>>>,
}

/// One supported version and its expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    /// Version string, e.g. `7.1.0`.
    pub version: String,
    /// End of support for this version.
    pub expiration: DateTime<Utc>,
    /// Entry-specific warning tiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

/// Override policy for a single workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exception {
    /// Workspace domain.
    #[serde(default)]
    pub domain: String,
    /// Workspace unique id.
    #[serde(default)]
    pub unique_id: String,
    /// Versions granted to this workspace.
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
    /// Warning tiers for the whole exception block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

/// A warning tier keyed by days remaining before expiration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Tier threshold in days.
    pub remaining_days: i64,
    /// Title template key.
    #[serde(default)]
    pub title: String,
    /// Subtitle template key.
    #[serde(default)]
    pub subtitle: String,
    /// Description template key.
    #[serde(default)]
    pub description: String,
    /// Severity.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    /// Extra interpolation parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<HashMap<String, String>>,
    /// Link to further information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Message severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Informational.
    Info,
    /// Needs attention.
    Alert,
    /// Support is about to end.
    Error,
    /// Anything this build does not know about.
    #[serde(other)]
    Unknown,
}

/// Where a verified policy document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySource {
    /// Served by the workspace server itself.
    Server,
    /// Served by the vendor cloud.
    Cloud,
    /// Bundled with the application.
    Builtin,
}

impl PolicySource {
    /// Wire name of the source.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Cloud => "cloud",
            Self::Builtin => "builtin",
        }
    }
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
