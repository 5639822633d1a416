/// Adaptive fallback poller for one topic
///
/// States:
/// - `Idle`: not started, or stopped
/// - `Polling`: ticking and fetching
/// - `Suspended`: ticking, but the push channel delivered this topic within
///   the current interval, so the fetch is skipped
///
/// The interval starts at the base value, is multiplied by the backoff
/// factor after every poll that changes nothing (unchanged value, stale
/// result or failure), and snaps back to the base value on a change or when
/// the push channel is lost. It never exceeds the configured maximum.
///
/// Each tick spawns its fetch. A tick that fires while the previous fetch is
/// still running is skipped, so requests never overlap.
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::fetcher::TopicFetcher;
use crate::arguments::is_debug_poller_enabled;
use crate::config::PollerConfig;
use crate::errors::{ErrorKind, SyncError};
use crate::logger::{self, LogTag};
use crate::store::WriteOutcome;
use crate::topics::{Credential, Topic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollerState {
    Idle,
    Polling,
    Suspended,
}

/// Result of one poll attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Store accepted a new value
    Changed,
    /// Value equal to the stored one
    Unchanged,
    /// A fresher push superseded the result
    Stale,
    Failed(ErrorKind),
    /// Previous fetch still in flight
    Skipped,
    /// Waiting for a credential refresh
    AuthBlocked,
    /// Result arrived after teardown and was dropped
    Discarded,
}

/// Destination of poll results
pub trait PollSink: Send + Sync {
    /// Submit a fetched value; `started_at` is when the request went out.
    /// `None` means the result was discarded without touching the store.
    fn apply_poll(&self, topic: &Topic, value: Value, started_at: Instant) -> Option<WriteOutcome>;

    /// True while the push channel is connected and delivered `topic`
    /// within `window`
    fn is_push_fresh(&self, topic: &Topic, window: Duration) -> bool;

    /// Non-fatal poll failure
    fn report_failure(&self, topic: &Topic, error: &SyncError);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollerStatus {
    pub topic: Topic,
    pub state: PollerState,
    pub interval_ms: u64,
    pub in_flight: bool,
    pub auth_blocked: bool,
    pub polls: u64,
    pub changes: u64,
    pub unchanged: u64,
    pub failures: u64,
    pub skipped: u64,
    pub suppressed: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct PollerInner {
    state: PollerState,
    interval: Duration,
    credential: Credential,
    auth_blocked: bool,
    task: Option<CancellationToken>,
    polls: u64,
    changes: u64,
    unchanged: u64,
    failures: u64,
    skipped: u64,
    suppressed: u64,
    last_poll_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct AdaptivePoller {
    topic: Topic,
    config: PollerConfig,
    fetcher: Arc<dyn TopicFetcher>,
    sink: Arc<dyn PollSink>,
    in_flight: AtomicBool,

    /// Signalled when the interval may have changed so the tick loop
    /// recomputes its deadline
    completed: Notify,
    inner: Mutex<PollerInner>,
}

/// Clears the in-flight flag even when the fetch future is dropped
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AdaptivePoller {
    pub fn new(
        topic: Topic,
        config: PollerConfig,
        credential: Credential,
        fetcher: Arc<dyn TopicFetcher>,
        sink: Arc<dyn PollSink>,
    ) -> Arc<Self> {
        let interval = config.base_interval();
        Arc::new(Self {
            topic,
            config,
            fetcher,
            sink,
            in_flight: AtomicBool::new(false),
            completed: Notify::new(),
            inner: Mutex::new(PollerInner {
                state: PollerState::Idle,
                interval,
                credential,
                auth_blocked: false,
                task: None,
                polls: 0,
                changes: 0,
                unchanged: 0,
                failures: 0,
                skipped: 0,
                suppressed: 0,
                last_poll_at: None,
                last_error: None,
            }),
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Start ticking under `parent`; false if already running
    ///
    /// The first tick fires immediately.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) -> bool {
        let token = parent.child_token();
        {
            let mut inner = self.inner.lock();
            if inner.task.is_some() {
                return false;
            }
            inner.task = Some(token.clone());
            inner.state = PollerState::Polling;
        }

        logger::info(
            LogTag::Poller,
            &format!(
                "Poller for {} started (base {}ms, max {}ms)",
                self.topic, self.config.base_interval_ms, self.config.max_interval_ms
            ),
        );
        let poller = self.clone();
        tokio::spawn(async move { poller.run(token).await });
        true
    }

    /// Stop ticking; a fetch already in flight finishes but its result is
    /// not applied by the tick loop
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(token) = inner.task.take() {
            token.cancel();
        }
        inner.state = PollerState::Idle;
    }

    /// Fetch once, now
    ///
    /// Honors the re-entrancy guard: returns `Skipped` without fetching
    /// while another fetch for this topic is in flight.
    pub async fn poll_now(&self) -> PollOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.inner.lock().skipped += 1;
            if is_debug_poller_enabled() {
                logger::debug(
                    LogTag::Poller,
                    &format!("{}: fetch still in flight, skipping", self.topic),
                );
            }
            return PollOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let credential = {
            let mut inner = self.inner.lock();
            if inner.auth_blocked {
                return PollOutcome::AuthBlocked;
            }
            inner.polls += 1;
            inner.last_poll_at = Some(Utc::now());
            inner.credential.clone()
        };

        let started_at = Instant::now();
        let outcome = match self.fetcher.fetch(&self.topic, &credential).await {
            Ok(value) => match self.sink.apply_poll(&self.topic, value, started_at) {
                Some(WriteOutcome::Inserted) | Some(WriteOutcome::Changed) => PollOutcome::Changed,
                Some(WriteOutcome::Unchanged) => PollOutcome::Unchanged,
                Some(WriteOutcome::Stale) => PollOutcome::Stale,
                None => PollOutcome::Discarded,
            },
            Err(e) => {
                let kind = e.kind();
                {
                    let mut inner = self.inner.lock();
                    inner.last_error = Some(e.to_string());
                    if kind == ErrorKind::Auth {
                        inner.auth_blocked = true;
                    }
                }
                logger::warning(
                    LogTag::Poller,
                    &format!("{}: poll failed ({:?}): {}", self.topic, kind, e),
                );
                self.sink.report_failure(&self.topic, &e);
                PollOutcome::Failed(kind)
            }
        };

        self.record(outcome);
        self.completed.notify_one();
        outcome
    }

    fn record(&self, outcome: PollOutcome) {
        let mut inner = self.inner.lock();
        let previous = inner.interval;
        match outcome {
            PollOutcome::Changed => {
                inner.changes += 1;
                inner.last_error = None;
                inner.interval = self.config.base_interval();
            }
            PollOutcome::Unchanged | PollOutcome::Stale => {
                inner.unchanged += 1;
                inner.last_error = None;
                inner.interval = self.backed_off(previous);
            }
            PollOutcome::Failed(_) => {
                inner.failures += 1;
                inner.interval = self.backed_off(previous);
            }
            PollOutcome::Skipped | PollOutcome::AuthBlocked | PollOutcome::Discarded => {}
        }

        if is_debug_poller_enabled() && inner.interval != previous {
            logger::debug(
                LogTag::Poller,
                &format!(
                    "{}: {:?}, interval {}ms -> {}ms",
                    self.topic,
                    outcome,
                    previous.as_millis(),
                    inner.interval.as_millis()
                ),
            );
        }
    }

    fn backed_off(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.config.backoff_multiplier).round() as u64;
        Duration::from_millis(next_ms.min(self.config.max_interval_ms).max(self.config.base_interval_ms))
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        loop {
            let tick_at = Instant::now();
            self.tick(&token);

            let mut deadline = tick_at + self.interval();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        self.inner.lock().state = PollerState::Idle;
                        return;
                    }
                    _ = self.completed.notified() => {
                        deadline = tick_at + self.interval();
                    }
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            }
        }
    }

    fn tick(self: &Arc<Self>, token: &CancellationToken) {
        let window = self.interval();
        if self.config.suppress_when_push_healthy && self.sink.is_push_fresh(&self.topic, window) {
            let mut inner = self.inner.lock();
            inner.suppressed += 1;
            if inner.state != PollerState::Suspended {
                inner.state = PollerState::Suspended;
                if is_debug_poller_enabled() {
                    logger::debug(
                        LogTag::Poller,
                        &format!("{}: push is fresh, suspending polls", self.topic),
                    );
                }
            }
            return;
        }

        {
            let mut inner = self.inner.lock();
            if inner.state == PollerState::Suspended && is_debug_poller_enabled() {
                logger::debug(LogTag::Poller, &format!("{}: resuming polls", self.topic));
            }
            inner.state = PollerState::Polling;
        }

        let poller = self.clone();
        let token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = poller.poll_now() => {}
            }
        });
    }

    /// Tighten back to the base interval after the push channel dropped
    ///
    /// The next tick fires at most one base interval after the previous one,
    /// immediately if that moment has already passed.
    pub fn on_push_lost(&self) {
        let base = self.config.base_interval();
        let previous = {
            let mut inner = self.inner.lock();
            if inner.task.is_none() || inner.interval == base {
                return;
            }
            std::mem::replace(&mut inner.interval, base)
        };

        if is_debug_poller_enabled() {
            logger::debug(
                LogTag::Poller,
                &format!(
                    "{}: push lost, interval {}ms -> {}ms",
                    self.topic,
                    previous.as_millis(),
                    base.as_millis()
                ),
            );
        }
        self.completed.notify_one();
    }

    /// Replace the credential and lift an auth block
    pub fn set_credential(&self, credential: Credential) {
        let mut inner = self.inner.lock();
        inner.credential = credential;
        if inner.auth_blocked {
            inner.auth_blocked = false;
            logger::info(LogTag::Poller, &format!("{}: credential refreshed", self.topic));
        }
    }

    pub fn state(&self) -> PollerState {
        self.inner.lock().state
    }

    pub fn interval(&self) -> Duration {
        self.inner.lock().interval
    }

    pub fn is_auth_blocked(&self) -> bool {
        self.inner.lock().auth_blocked
    }

    pub fn status(&self) -> PollerStatus {
        let inner = self.inner.lock();
        PollerStatus {
            topic: self.topic.clone(),
            state: inner.state,
            interval_ms: inner.interval.as_millis() as u64,
            in_flight: self.in_flight.load(Ordering::SeqCst),
            auth_blocked: inner.auth_blocked,
            polls: inner.polls,
            changes: inner.changes,
            unchanged: inner.unchanged,
            failures: inner.failures,
            skipped: inner.skipped,
            suppressed: inner.suppressed,
            last_poll_at: inner.last_poll_at,
            last_error: inner.last_error.clone(),
        }
    }
}
