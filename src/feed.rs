//! Polling change feed.
//!
//! Every adapter owns one [`ChangeFeed`]. The first subscriber takes a
//! baseline snapshot (id → `updated_at` of non-archived entries) and starts
//! a tokio interval task; each tick diffs the backend against that snapshot
//! and emits `created` / `updated` / `deleted` events. The last
//! unsubscribe aborts the task.
//!
//! ```text
//!   subscribe ──► baseline snapshot ──► spawn poll loop
//!                                          │ every interval
//!                                          ▼
//!             changed_since(last − overlap) + snapshot
//!                                          │ diff vs known
//!                                          ▼
//!                      callbacks (panics caught, errors logged)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::models::{DevlogEntry, DevlogEvent, DevlogId, now_millis};

pub type EventCallback = Arc<dyn Fn(&DevlogEvent) + Send + Sync>;

/// Wraps a closure as an [`EventCallback`].
pub fn callback<F>(f: F) -> EventCallback
where
    F: Fn(&DevlogEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Backend view the poll loop diffs against.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Non-archived entries with `updated_at >= since`.
    async fn changed_since(&self, since: DateTime<Utc>) -> Result<Vec<DevlogEntry>>;

    /// `updated_at` of every non-archived entry, keyed by id.
    async fn snapshot(&self) -> Result<HashMap<DevlogId, DateTime<Utc>>>;
}

const DEFAULT_OVERLAP: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct FeedState {
    subscribers: Mutex<BTreeMap<u64, EventCallback>>,
    next_id: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
    start: tokio::sync::Mutex<()>,
}

impl FeedState {
    /// Stops the task while still holding the subscriber lock, so a
    /// concurrent `subscribe` either lands first or sees no task.
    fn remove(&self, id: u64) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.remove(&id);
        if subscribers.is_empty() {
            self.stop_task();
        }
    }

    fn stop_task(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }

    fn dispatch(&self, label: &str, event: &DevlogEvent) {
        let callbacks: Vec<EventCallback> = lock(&self.subscribers).values().cloned().collect();
        for cb in callbacks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
                warn!(feed = label, event = ?event.event_type, "change subscriber panicked");
            }
        }
    }
}

/// Subscription registry plus the poll task of one adapter instance.
pub struct ChangeFeed {
    label: String,
    interval: Duration,
    overlap: Duration,
    state: Arc<FeedState>,
}

impl ChangeFeed {
    pub fn new(label: impl Into<String>, interval: Duration) -> Self {
        Self {
            label: label.into(),
            interval,
            overlap: DEFAULT_OVERLAP,
            state: Arc::new(FeedState {
                subscribers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                task: Mutex::new(None),
                start: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Widens the `changed_since` window, for backends whose timestamps come
    /// from a remote clock.
    pub fn with_overlap(mut self, overlap: Duration) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state.subscribers).len()
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.state.task)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Registers `callback`; starts polling on the first subscriber.
    ///
    /// The baseline snapshot is taken before this returns, so any mutation
    /// made after `subscribe` resolves is reported.
    pub async fn subscribe(
        &self,
        source: Arc<dyn ChangeSource>,
        callback: EventCallback,
    ) -> Result<Subscription> {
        let _start = self.state.start.lock().await;
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Subscription {
            id,
            state: Arc::downgrade(&self.state),
        };

        // Lock order everywhere: subscribers, then task.
        {
            let mut subscribers = lock(&self.state.subscribers);
            let running = lock(&self.state.task)
                .as_ref()
                .is_some_and(|handle| !handle.is_finished());
            if running {
                subscribers.insert(id, callback);
                return Ok(subscription);
            }
        }

        let started_at = now_millis();
        let baseline = source.snapshot().await?;
        debug!(
            feed = %self.label,
            known = baseline.len(),
            interval_ms = self.interval.as_millis() as u64,
            "starting change feed"
        );
        let poller = Poller {
            label: self.label.clone(),
            source,
            known: baseline,
            last_poll: started_at,
            overlap: chrono::Duration::from_std(self.overlap)
                .unwrap_or_else(|_| chrono::Duration::seconds(1)),
        };

        let mut subscribers = lock(&self.state.subscribers);
        subscribers.insert(id, callback);
        let handle = tokio::spawn(poll_loop(poller, Arc::downgrade(&self.state), self.interval));
        *lock(&self.state.task) = Some(handle);
        drop(subscribers);
        Ok(subscription)
    }

    /// Drops every subscriber and stops polling.
    pub fn stop(&self) {
        lock(&self.state.subscribers).clear();
        self.state.stop_task();
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    state: Weak<FeedState>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Diff state carried across ticks.
pub(crate) struct Poller {
    label: String,
    source: Arc<dyn ChangeSource>,
    known: HashMap<DevlogId, DateTime<Utc>>,
    last_poll: DateTime<Utc>,
    overlap: chrono::Duration,
}

impl Poller {
    /// One diff pass. `last_poll` only advances on success.
    async fn poll_once(&mut self) -> Result<Vec<DevlogEvent>> {
        let tick_started = now_millis();
        let changed = self
            .source
            .changed_since(self.last_poll - self.overlap)
            .await?;
        let current = self.source.snapshot().await?;

        let mut events = Vec::new();
        for entry in changed {
            let Some(id) = entry.id else { continue };
            if entry.archived {
                continue;
            }
            match self.known.get(&id) {
                None => {
                    self.known.insert(id, entry.updated_at);
                    events.push(DevlogEvent::created(entry));
                }
                Some(previous) if *previous != entry.updated_at => {
                    self.known.insert(id, entry.updated_at);
                    events.push(DevlogEvent::updated(entry));
                }
                Some(_) => {}
            }
        }

        let mut gone: Vec<DevlogId> = self
            .known
            .keys()
            .filter(|id| !current.contains_key(id))
            .copied()
            .collect();
        gone.sort_unstable();
        for id in gone {
            self.known.remove(&id);
            events.push(DevlogEvent::deleted(id));
        }

        self.last_poll = tick_started;
        Ok(events)
    }
}

async fn poll_loop(mut poller: Poller, state: Weak<FeedState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately; the baseline covers it
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(state) = state.upgrade() else { break };

        match poller.poll_once().await {
            Ok(events) => {
                if !events.is_empty() {
                    debug!(feed = %poller.label, count = events.len(), "change feed tick");
                }
                for event in &events {
                    state.dispatch(&poller.label, event);
                }
            }
            Err(err) => {
                warn!(feed = %poller.label, error = %err, "change feed poll failed");
            }
        }
    }
}
