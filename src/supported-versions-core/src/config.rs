//! Configuration for policy fetching and check scheduling.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the supported-versions engine.
#[derive(Debug, Clone)]
pub struct SupportedVersionsConfig {
    /// Vendor cloud base URL.
    pub cloud_endpoint: String,
    /// Request timeout for each HTTP call.
    pub timeout: Duration,
    /// Attempts per network source (server info, cloud policy).
    pub fetch_attempts: u32,
    /// Fixed delay between attempts on the same source.
    pub fetch_retry_delay: Duration,
    /// Cache file; memory-only when unset.
    pub cache_file: Option<PathBuf>,
    /// Where the bundled fallback policy comes from.
    pub builtin: BuiltinSource,
    /// Scheduling policy.
    pub scheduler: SchedulerConfig,
}

impl Default for SupportedVersionsConfig {
    fn default() -> Self {
        Self {
            cloud_endpoint: "https://releases.rocket.chat".into(),
            timeout: Duration::from_secs(30),
            fetch_attempts: 3,
            fetch_retry_delay: Duration::from_millis(2000),
            cache_file: None,
            builtin: BuiltinSource::Bundled,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Origin of the bundled fallback policy token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BuiltinSource {
    /// Token compiled into the binary.
    #[default]
    Bundled,
    /// Token read from a file at first use.
    File(PathBuf),
    /// No bundled fallback.
    Disabled,
}

/// When and how often checks run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay applied to fresh non-immediate requests.
    pub debounce_delay: Duration,
    /// Minimum spacing between executed checks for one server.
    pub throttle_interval: Duration,
    /// Delay before each attempt, indexed by retry count.
    pub retry_delays: Vec<Duration>,
    /// Total attempts per scheduled check.
    pub max_retry_attempts: u32,
    /// Consecutive failures before a server is flagged.
    pub failure_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_millis(5000),
            throttle_interval: Duration::from_millis(30_000),
            retry_delays: vec![
                Duration::ZERO,
                Duration::from_millis(5000),
                Duration::from_millis(15_000),
            ],
            max_retry_attempts: 3,
            failure_threshold: 3,
        }
    }
}

impl SchedulerConfig {
    /// Delay before attempt number `retry`. Clamps to the last entry.
    #[must_use]
    pub fn retry_delay(&self, retry: u32) -> Duration {
        self.retry_delays
            .get(retry as usize)
            .or(self.retry_delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}
