//! # supported-versions-core
//!
//! Client-side enforcement of a vendor's signed "supported versions"
//! policy for connected workspace servers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  EventBindings  (server-ready, dialog-dismissed, refresh...) │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌────────────────────────────────────────────────────┐     │
//! │  │        CheckScheduler (debounce/throttle/retry)    │     │
//! │  └────────────────────────────────────────────────────┘     │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌────────────────────────────────────────────────────┐     │
//! │  │   SupportedVersionsEngine                          │     │
//! │  │   server ─▶ cloud ─▶ cache ─▶ builtin              │     │
//! │  └────────────────────────────────────────────────────┘     │
//! │        │               │               │                     │
//! │        ▼               ▼               ▼                     │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────┐         │
//! │  │HttpsClient │  │PolicyVerifier│  │ PolicyCache  │         │
//! │  │ (sources)  │  │   (RS256)    │  │ (JSON file)  │         │
//! │  └────────────┘  └──────────────┘  └──────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! - **Fail-closed verification**: unsigned or mis-signed documents are
//!   never cached or used
//! - **Fail-open evaluation**: a server is only blocked on positive evidence
//!   from a verified document
//! - **Staleness disclosure**: serving cached or bundled data always emits
//!   an error event

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod bindings;
pub mod builtin;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod https;
pub mod jwt;
pub mod message;
pub mod policy;
pub mod registry;
pub mod scheduler;

pub use bindings::{EventBindings, InboundEvent};
pub use builtin::BuiltinPolicy;
pub use cache::{CacheEntry, PolicyCache};
pub use config::{BuiltinSource, SchedulerConfig, SupportedVersionsConfig};
pub use engine::{CascadeOutcome, StatusReport, SupportedVersionsEngine};
pub use error::SupportedVersionsError;
pub use evaluator::{evaluate, get_expiration_message, SupportVerdict};
pub use events::{ChannelEventSink, EventSink, RecordingEventSink, SupportedVersionsEvent};
pub use https::{HttpsClient, PolicySources, ServerInfo, SignedPolicy};
pub use jwt::{JwtError, PolicyVerifier};
pub use message::{render_message, MessageContext, RenderedMessage};
pub use policy::{Exception, Message, MessageKind, PolicyDocument, PolicySource, VersionEntry};
pub use registry::{InMemoryServerRegistry, ServerRef, ServerRegistry};
pub use scheduler::{CheckScheduler, ScheduleOptions};
