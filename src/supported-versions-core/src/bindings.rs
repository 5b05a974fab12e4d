//! Inbound event wiring.
//!
//! Connects the host application's lifecycle events and the manual refresh
//! command to the scheduler, and the scheduler to the cascade.
//!
//! | Trigger            | Scheduling              |
//! |--------------------|-------------------------|
//! | `server-ready`     | immediate               |
//! | `refresh`          | immediate               |
//! | `dialog-dismissed` | debounced and throttled |
//! | `server-reloaded`  | debounced and throttled |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::{CascadeOutcome, SupportedVersionsEngine};
use crate::error::SupportedVersionsError;
use crate::evaluator::SupportVerdict;
use crate::scheduler::{CheckScheduler, ScheduleOptions};

/// Lifecycle event from the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// A server view finished loading.
    ServerReady {
        /// Server URL.
        url: String,
    },
    /// The unsupported-version dialog was closed.
    DialogDismissed {
        /// Server URL.
        url: String,
    },
    /// A server view was reloaded.
    ServerReloaded {
        /// Server URL.
        url: String,
    },
}

impl InboundEvent {
    fn into_parts(self) -> (String, ScheduleOptions) {
        match self {
            Self::ServerReady { url } => (url, ScheduleOptions::immediate()),
            Self::DialogDismissed { url } | Self::ServerReloaded { url } => {
                (url, ScheduleOptions::debounced())
            },
        }
    }
}

/// Routes inbound events to scheduled cascade runs.
#[derive(Clone)]
pub struct EventBindings {
    engine: Arc<SupportedVersionsEngine>,
    scheduler: CheckScheduler,
}

impl EventBindings {
    /// Bind `engine` behind `scheduler`.
    pub fn new(engine: Arc<SupportedVersionsEngine>, scheduler: CheckScheduler) -> Self {
        Self { engine, scheduler }
    }

    /// Bind `engine` with a scheduler built from its own configuration.
    pub fn with_engine(engine: Arc<SupportedVersionsEngine>) -> Self {
        let scheduler = CheckScheduler::new(
            engine.config().scheduler.clone(),
            engine.registry().clone(),
        );
        Self::new(engine, scheduler)
    }

    /// Schedule a check for an inbound event. Returns `false` if throttled.
    pub fn handle(&self, event: InboundEvent) -> bool {
        debug!(event = ?event, "Bindings: inbound event");
        let (url, options) = event.into_parts();
        self.schedule(&url, options)
    }

    /// Check `server_url` right away, bypassing debounce and throttling.
    pub fn refresh(&self, server_url: &str) -> bool {
        info!(url = %server_url, "Bindings: manual refresh");
        self.schedule(server_url, ScheduleOptions::immediate())
    }

    /// Handle events until the channel closes, then wait for every
    /// accepted check, retries included, to finish.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<InboundEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!(
            pending = self.scheduler.pending_count(),
            "Bindings: inbound channel closed, draining"
        );
        self.scheduler.drain().await;
    }

    /// Current support verdict for `url`.
    pub async fn support_status(&self, url: &str) -> Option<SupportVerdict> {
        self.engine.support_status(url).await
    }

    /// The scheduler in use.
    pub fn scheduler(&self) -> &CheckScheduler {
        &self.scheduler
    }

    fn schedule(&self, url: &str, options: ScheduleOptions) -> bool {
        let engine = self.engine.clone();
        self.scheduler.schedule_check(
            url,
            move |url| {
                let engine = engine.clone();
                async move { run_cascade(&engine, &url).await }
            },
            options,
        )
    }
}

/// One scheduled check. Anything short of a fresh document counts as a
/// failure so the scheduler retries and counts it.
async fn run_cascade(
    engine: &SupportedVersionsEngine,
    url: &str,
) -> Result<(), SupportedVersionsError> {
    match engine.update_supported_versions_data(url).await {
        CascadeOutcome::Fresh(_) | CascadeOutcome::UnknownServer => Ok(()),
        CascadeOutcome::Fallback(_) | CascadeOutcome::Unavailable => {
            Err(SupportedVersionsError::ExhaustedSources {
                url: url.to_string(),
            })
        },
    }
}
