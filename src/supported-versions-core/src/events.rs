//! Outbound supported-versions events.
//!
//! The host application's UI layer listens for these to show loading state,
//! the latest policy and staleness.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::policy::{PolicyDocument, PolicySource};

/// Event emitted by the cascade for one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SupportedVersionsEvent {
    /// A cascade started.
    Loading {
        /// Server URL.
        url: String,
    },
    /// Server version discovered from `/api/info`.
    VersionUpdated {
        /// Server URL.
        url: String,
        /// Reported version.
        version: String,
    },
    /// Workspace unique id discovered.
    UniqueIdUpdated {
        /// Server URL.
        url: String,
        /// Workspace unique id.
        #[serde(rename = "uniqueID")]
        unique_id: String,
    },
    /// A verified policy document is now in effect for the server.
    SupportedVersionsUpdated {
        /// Server URL.
        url: String,
        /// The document.
        #[serde(rename = "supportedVersions")]
        supported_versions: PolicyDocument,
        /// Reported source.
        source: PolicySource,
        /// Source the document originally came from, when served from cache.
        #[serde(
            rename = "cachedOrigin",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        cached_origin: Option<PolicySource>,
    },
    /// No fresh policy could be obtained.
    SupportedVersionsError {
        /// Server URL.
        url: String,
    },
}

impl SupportedVersionsEvent {
    /// URL of the server the event is about.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Loading { url }
            | Self::VersionUpdated { url, .. }
            | Self::UniqueIdUpdated { url, .. }
            | Self::SupportedVersionsUpdated { url, .. }
            | Self::SupportedVersionsError { url } => url,
        }
    }
}

/// Receiver of outbound events.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Must not block.
    fn emit(&self, event: SupportedVersionsEvent);
}

/// Forwards events into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<SupportedVersionsEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiving half.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SupportedVersionsEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: SupportedVersionsEvent) {
        if self.tx.send(event).is_err() {
            trace!("Events: receiver dropped");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<SupportedVersionsEvent>>,
}

impl RecordingEventSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far.
    pub fn events(&self) -> Vec<SupportedVersionsEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Drop recorded events.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: SupportedVersionsEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
