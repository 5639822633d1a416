/// StateStore - canonical in-memory values per topic
///
/// The store is the only shared mutable state in the synchronization layer.
/// Producers (push channel, pollers) never touch it directly; the coordinator
/// submits candidate values and the store decides whether anything changed.
/// Listeners are invoked synchronously, after the write is committed and
/// without the data lock, so a listener may read the store again. A write and
/// its notifications run under a reentrant gate: writers from other threads
/// wait until every listener has seen the previous value, so listeners always
/// observe changes in commit order. A listener may write to the store itself;
/// the outer notification stops as soon as the nested write supersedes it.
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use serde_json::Value;

use super::equality::structurally_equal;
use crate::arguments::is_debug_store_enabled;
use crate::logger::{self, LogTag};
use crate::topics::Topic;

/// Callback invoked with the new value of a topic
pub type Listener = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Result of submitting a candidate value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// First value for the topic
    Inserted,
    /// Value differed from the stored one
    Changed,
    /// Structurally equal to the stored value, listeners not called
    Unchanged,
    /// Older than the stored value, rejected
    Stale,
}

impl WriteOutcome {
    /// True when listeners were notified
    pub fn is_change(&self) -> bool {
        matches!(self, WriteOutcome::Inserted | WriteOutcome::Changed)
    }
}

/// Registration handle returned by [`StateStore::subscribe_listener`]
///
/// Dropping the handle does not unregister; call [`StateStore::release`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    id: u64,
    topic: Topic,
}

impl ListenerHandle {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

struct Entry {
    value: Value,
    version: Option<u64>,
    updated_at: DateTime<Utc>,

    /// Bumped on every change, unique across resets
    generation: u64,
}

#[derive(Default)]
struct StoreInner {
    values: HashMap<Topic, Entry>,
    listeners: HashMap<Topic, Vec<(u64, Listener)>>,
    next_listener_id: u64,
    next_generation: u64,
}

#[derive(Debug, Default)]
struct StoreStats {
    writes: AtomicU64,
    changes: AtomicU64,
    suppressed: AtomicU64,
    stale_rejected: AtomicU64,
    listener_failures: AtomicU64,
}

/// Store counters (serializable)
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatsSnapshot {
    pub writes: u64,
    pub changes: u64,
    pub suppressed: u64,
    pub stale_rejected: u64,
    pub listener_failures: u64,
}

pub struct StateStore {
    inner: Mutex<StoreInner>,

    /// Held across commit and notify
    write_gate: ReentrantMutex<()>,
    stats: StoreStats,
}

impl Default for StateStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            write_gate: ReentrantMutex::new(()),
            stats: StoreStats::default(),
        }
    }
}

impl StateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Submit a candidate value with last-write-wins semantics
    pub fn set_value(&self, topic: &Topic, value: Value) -> WriteOutcome {
        self.write(topic, value, None)
    }

    /// Submit a candidate value tagged with a per-topic sequence number
    ///
    /// Writes older than the highest sequence seen for the topic are
    /// rejected as [`WriteOutcome::Stale`].
    pub fn set_versioned(&self, topic: &Topic, value: Value, version: u64) -> WriteOutcome {
        self.write(topic, value, Some(version))
    }

    fn write(&self, topic: &Topic, value: Value, version: Option<u64>) -> WriteOutcome {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        let _gate = self.write_gate.lock();

        let (outcome, generation, listeners) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let generation = inner.next_generation + 1;

            let outcome = match inner.values.get_mut(topic) {
                None => {
                    inner.values.insert(
                        topic.clone(),
                        Entry {
                            value: value.clone(),
                            version,
                            updated_at: Utc::now(),
                            generation,
                        },
                    );
                    WriteOutcome::Inserted
                }
                Some(entry) => {
                    let is_stale = matches!(
                        (entry.version, version),
                        (Some(stored), Some(incoming)) if incoming < stored
                    );
                    if is_stale {
                        WriteOutcome::Stale
                    } else {
                        if let Some(incoming) = version {
                            entry.version = Some(incoming);
                        }
                        if structurally_equal(&entry.value, &value) {
                            WriteOutcome::Unchanged
                        } else {
                            entry.value = value.clone();
                            entry.updated_at = Utc::now();
                            entry.generation = generation;
                            WriteOutcome::Changed
                        }
                    }
                }
            };

            let listeners: Vec<Listener> = if outcome.is_change() {
                inner.next_generation = generation;
                inner
                    .listeners
                    .get(topic)
                    .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
                    .unwrap_or_default()
            } else {
                Vec::new()
            };

            (outcome, generation, listeners)
        };

        match outcome {
            WriteOutcome::Inserted | WriteOutcome::Changed => {
                self.stats.changes.fetch_add(1, Ordering::Relaxed);
                if is_debug_store_enabled() {
                    logger::debug(
                        LogTag::Store,
                        &format!("{} {:?}, notifying {} listeners", topic, outcome, listeners.len()),
                    );
                }
                self.notify(topic, &value, generation, &listeners);
            }
            WriteOutcome::Unchanged => {
                self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            }
            WriteOutcome::Stale => {
                self.stats.stale_rejected.fetch_add(1, Ordering::Relaxed);
                logger::debug(
                    LogTag::Store,
                    &format!("{}: rejected stale write (version {:?})", topic, version),
                );
            }
        }

        outcome
    }

    /// Invoke each listener in isolation; failures are logged and skipped
    fn notify(&self, topic: &Topic, value: &Value, generation: u64, listeners: &[Listener]) {
        for listener in listeners {
            if !self.is_current(topic, generation) {
                if is_debug_store_enabled() {
                    logger::debug(
                        LogTag::Store,
                        &format!("{}: superseded during notify, remaining listeners skipped", topic),
                    );
                }
                return;
            }
            match catch_unwind(AssertUnwindSafe(|| listener(value))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.stats.listener_failures.fetch_add(1, Ordering::Relaxed);
                    logger::error(LogTag::Store, &format!("Listener for {} failed: {:#}", topic, e));
                }
                Err(_) => {
                    self.stats.listener_failures.fetch_add(1, Ordering::Relaxed);
                    logger::error(LogTag::Store, &format!("Listener for {} panicked", topic));
                }
            }
        }
    }

    fn is_current(&self, topic: &Topic, generation: u64) -> bool {
        self.inner
            .lock()
            .values
            .get(topic)
            .map_or(false, |entry| entry.generation == generation)
    }

    /// Current value, or `None` if the topic was never set
    pub fn get_value(&self, topic: &Topic) -> Option<Value> {
        self.inner.lock().values.get(topic).map(|e| e.value.clone())
    }

    /// Highest sequence number accepted for the topic
    pub fn version(&self, topic: &Topic) -> Option<u64> {
        self.inner.lock().values.get(topic).and_then(|e| e.version)
    }

    /// Time of the last change (not of the last write)
    pub fn updated_at(&self, topic: &Topic) -> Option<DateTime<Utc>> {
        self.inner.lock().values.get(topic).map(|e| e.updated_at)
    }

    pub fn subscribe_listener<F>(&self, topic: &Topic, callback: F) -> ListenerHandle
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_listener_id += 1;
        let id = inner.next_listener_id;
        inner
            .listeners
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        ListenerHandle {
            id,
            topic: topic.clone(),
        }
    }

    /// Deregister a listener; returns false if it was already released
    pub fn release(&self, handle: &ListenerHandle) -> bool {
        let mut inner = self.inner.lock();
        let Some(list) = inner.listeners.get_mut(&handle.topic) else {
            return false;
        };

        let before = list.len();
        list.retain(|(id, _)| *id != handle.id);
        let removed = list.len() != before;

        if list.is_empty() {
            inner.listeners.remove(&handle.topic);
        }
        removed
    }

    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.inner.lock().listeners.get(topic).map_or(0, Vec::len)
    }

    /// Topics that currently hold a value
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.inner.lock().values.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Drop every value and listener (test isolation, logout)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.values.clear();
        inner.listeners.clear();
    }

    pub fn stats(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            writes: self.stats.writes.load(Ordering::Relaxed),
            changes: self.stats.changes.load(Ordering::Relaxed),
            suppressed: self.stats.suppressed.load(Ordering::Relaxed),
            stale_rejected: self.stats.stale_rejected.load(Ordering::Relaxed),
            listener_failures: self.stats.listener_failures.load(Ordering::Relaxed),
        }
    }
}
