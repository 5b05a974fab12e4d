//! Per-server check scheduling.
//!
//! Decides *when* a supported-versions check runs for a server:
//!
//! 1. **Debounce**: fresh requests wait `debounce_delay`; a newer request
//!    for the same server replaces the pending one
//! 2. **Throttle**: fresh requests are dropped while the last executed check
//!    is younger than `throttle_interval`
//! 3. **Retry**: a failed check is rescheduled with `retry_delays[n]` until
//!    `max_retry_attempts` is reached
//!
//! At most one check is pending per server. Replacing an entry aborts its
//! task and bumps a generation number so a superseded timer never runs its
//! check even if it already woke up.
//!
//! Checks for one server never overlap. A request that arrives while a check
//! is running waits for it to finish, and the running check is marked
//! superseded so its failure does not re-arm a retry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::SchedulerConfig;
use crate::error::SupportedVersionsError;
use crate::registry::ServerRegistry;

/// Future returned by a scheduled check.
pub type CheckFuture = BoxFuture<'static, Result<(), SupportedVersionsError>>;

/// A check to run for a server URL.
pub type CheckFn = Arc<dyn Fn(String) -> CheckFuture + Send + Sync>;

/// How a check should be scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Run without delay, bypassing throttling.
    pub immediate: bool,
    /// Retry continuation number; bypasses throttling.
    pub retry: Option<u32>,
}

impl ScheduleOptions {
    /// Run as soon as possible.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            retry: None,
        }
    }

    /// Debounced and throttled.
    #[must_use]
    pub fn debounced() -> Self {
        Self::default()
    }
}

/// Bookkeeping for a scheduled, not yet started check.
struct PendingCheck {
    generation: u64,
    retry_count: u32,
    handle: JoinHandle<()>,
}

/// A check currently executing.
struct RunningCheck {
    /// A newer request or a cancellation arrived; do not retry.
    superseded: bool,
}

#[derive(Default)]
struct Slots {
    pending: HashMap<String, PendingCheck>,
    running: HashMap<String, RunningCheck>,
}

impl Slots {
    fn supersede_running(&mut self, url: &str) {
        if let Some(running) = self.running.get_mut(url) {
            running.superseded = true;
        }
    }
}

struct SchedulerState {
    config: SchedulerConfig,
    registry: Arc<dyn ServerRegistry>,
    /// Pending and running checks by server URL.
    slots: Mutex<Slots>,
    /// Start time of the last executed check by server URL.
    last_check: Mutex<HashMap<String, Instant>>,
    /// Signalled whenever a check finishes or entries are cancelled.
    changed: Notify,
    next_generation: AtomicU64,
}

/// Debounce/throttle/retry scheduler for supported-versions checks.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct CheckScheduler {
    state: Arc<SchedulerState>,
}

impl CheckScheduler {
    /// Create a scheduler reporting failures to `registry`.
    pub fn new(config: SchedulerConfig, registry: Arc<dyn ServerRegistry>) -> Self {
        Self {
            state: Arc::new(SchedulerState {
                config,
                registry,
                slots: Mutex::new(Slots::default()),
                last_check: Mutex::new(HashMap::new()),
                changed: Notify::new(),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Schedule `check` for `url`, replacing any pending check.
    ///
    /// Returns `false` when the request was dropped by throttling.
    pub fn schedule_check<F, Fut>(&self, url: &str, check: F, options: ScheduleOptions) -> bool
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SupportedVersionsError>> + Send + 'static,
    {
        let check: CheckFn = Arc::new(move |url| -> CheckFuture { Box::pin(check(url)) });
        self.schedule(url, check, options)
    }

    fn schedule(&self, url: &str, check: CheckFn, options: ScheduleOptions) -> bool {
        self.cancel_check(url);

        let retry_count = options.retry.unwrap_or(0);
        let delay = if options.immediate {
            Duration::ZERO
        } else if let Some(retry) = options.retry {
            self.state.config.retry_delay(retry)
        } else {
            if self.should_throttle(url) {
                debug!(url = %url, "Scheduler: throttled, request dropped");
                return false;
            }
            self.state.config.debounce_delay
        };

        let mut slots = self.slots();
        slots.supersede_running(url);
        self.arm(&mut slots, url, check, retry_count, delay);
        true
    }

    /// Spawn the timer task for `url` and install it as the pending entry.
    ///
    /// Spawned under the lock so the task cannot look for its entry before
    /// it is inserted.
    fn arm(&self, slots: &mut Slots, url: &str, check: CheckFn, retry_count: u32, delay: Duration) {
        let generation = self.state.next_generation.fetch_add(1, Ordering::Relaxed);

        let scheduler = self.clone();
        let task_url = url.to_string();
        let handle = tokio::spawn(async move {
            scheduler
                .fire(task_url, generation, retry_count, check, delay)
                .await;
        });

        if let Some(old) = slots.pending.insert(
            url.to_string(),
            PendingCheck {
                generation,
                retry_count,
                handle,
            },
        ) {
            old.handle.abort();
        }

        trace!(
            url = %url,
            delay_ms = delay.as_millis() as u64,
            retry = retry_count,
            "Scheduler: check scheduled"
        );
    }

    async fn fire(
        self,
        url: String,
        generation: u64,
        retry_count: u32,
        check: CheckFn,
        delay: Duration,
    ) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        loop {
            let finished = self.state.changed.notified();
            {
                let mut slots = self.slots();
                let current = slots
                    .pending
                    .get(&url)
                    .is_some_and(|entry| entry.generation == generation);
                if !current {
                    trace!(url = %url, "Scheduler: superseded check skipped");
                    return;
                }
                if !slots.running.contains_key(&url) {
                    slots.pending.remove(&url);
                    slots
                        .running
                        .insert(url.clone(), RunningCheck { superseded: false });
                    break;
                }
            }
            trace!(url = %url, "Scheduler: waiting for running check");
            finished.await;
        }

        self.record_check_attempt(&url);
        debug!(url = %url, attempt = retry_count + 1, "Scheduler: running check");

        let result = check(url.clone()).await;

        {
            let mut slots = self.slots();
            let superseded = slots
                .running
                .remove(&url)
                .map_or(true, |running| running.superseded);

            match result {
                Ok(()) => {
                    self.state.registry.reset_failure_count(&url);
                },
                Err(e) => {
                    let failures = self.state.registry.increment_failure_count(&url);
                    if superseded {
                        debug!(
                            url = %url,
                            error = %e,
                            failures,
                            "Scheduler: check failed, superseded by a newer request"
                        );
                    } else if retry_count + 1 < self.state.config.max_retry_attempts {
                        warn!(
                            url = %url,
                            error = %e,
                            failures,
                            next_retry = retry_count + 1,
                            "Scheduler: check failed, retrying"
                        );
                        let next = retry_count + 1;
                        let delay = self.state.config.retry_delay(next);
                        self.arm(&mut slots, &url, check, next, delay);
                    } else {
                        warn!(
                            url = %url,
                            error = %e,
                            failures,
                            "Scheduler: check failed, giving up"
                        );
                    }
                },
            }
        }
        self.state.changed.notify_waiters();
    }

    /// Cancel the pending check for `url`. Returns whether one existed.
    ///
    /// A check already running for `url` finishes but is not retried.
    pub fn cancel_check(&self, url: &str) -> bool {
        let cancelled = {
            let mut slots = self.slots();
            slots.supersede_running(url);
            match slots.pending.remove(url) {
                Some(entry) => {
                    entry.handle.abort();
                    trace!(url = %url, "Scheduler: pending check cancelled");
                    true
                },
                None => false,
            }
        };
        self.state.changed.notify_waiters();
        cancelled
    }

    /// Cancel every pending check and every retry of a running one.
    pub fn cancel_all(&self) {
        {
            let mut slots = self.slots();
            for (_, entry) in slots.pending.drain() {
                entry.handle.abort();
            }
            for running in slots.running.values_mut() {
                running.superseded = true;
            }
        }
        self.state.changed.notify_waiters();
    }

    /// Wait until no check is pending or running, retries included.
    pub async fn drain(&self) {
        loop {
            let changed = self.state.changed.notified();
            {
                let slots = self.slots();
                if slots.pending.is_empty() && slots.running.is_empty() {
                    return;
                }
            }
            changed.await;
        }
    }

    /// Whether a check is pending for `url`.
    pub fn has_pending(&self, url: &str) -> bool {
        self.slots().pending.contains_key(url)
    }

    /// Whether a check is executing for `url`.
    pub fn is_running(&self, url: &str) -> bool {
        self.slots().running.contains_key(url)
    }

    /// Retry number of the pending check for `url`.
    pub fn pending_retry(&self, url: &str) -> Option<u32> {
        self.slots().pending.get(url).map(|p| p.retry_count)
    }

    /// Number of pending checks.
    pub fn pending_count(&self) -> usize {
        self.slots().pending.len()
    }

    /// Mark a check for `url` as started now.
    pub fn record_check_attempt(&self, url: &str) {
        self.last_check().insert(url.to_string(), Instant::now());
    }

    /// Whether a fresh request for `url` would be throttled.
    pub fn should_throttle(&self, url: &str) -> bool {
        self.last_check()
            .get(url)
            .is_some_and(|last| last.elapsed() < self.state.config.throttle_interval)
    }

    /// Consecutive failed checks for `url`.
    pub fn failure_count(&self, url: &str) -> u32 {
        self.state
            .registry
            .get(url)
            .map(|s| s.version_check_failure_count)
            .unwrap_or(0)
    }

    /// Whether `url` has failed often enough to warrant a persistent warning.
    pub fn is_failure_threshold_reached(&self, url: &str) -> bool {
        self.failure_count(url) >= self.state.config.failure_threshold
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.state
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn last_check(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.state
            .last_check
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
