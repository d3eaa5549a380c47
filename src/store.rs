//! ==============================================================================
//! store.rs - upstream realtime data store abstraction
//! ==============================================================================
//!
//! purpose:
//!     the engine only needs two capabilities from the hosted database:
//!     - subscribe(path): a push stream of json values for one path
//!     - write(path, value): an async write that may fail
//!     the wire protocol behind them is not the engine's concern.
//!
//! relationships:
//!     - used by: engine.rs (subscriptions + outbound commands)
//!     - used by: demo.rs (simulated device writing into MemoryStore)
//!     - used by: main.rs (builds the MemoryStore the engine runs against)
//!
//! ==============================================================================

use crate::error::StoreError;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// push events delivered by a subscription
pub type EventStream = BoxStream<'static, Result<Value, StoreError>>;

// ==============================================================================
// subscription
// ==============================================================================

/// teardown handle for one subscription; runs its release hook at most once
pub struct Unsubscribe {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// release the upstream registration; later calls are no-ops
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// an established subscription: the event stream plus its teardown handle
pub struct Subscription {
    path: String,
    events: EventStream,
    handle: Unsubscribe,
}

impl Subscription {
    pub fn new(path: impl Into<String>, events: EventStream, handle: Unsubscribe) -> Self {
        Self {
            path: path.into(),
            events,
            handle,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn next(&mut self) -> Option<Result<Value, StoreError>> {
        self.events.next().await
    }

    /// split so the stream can move into a task while the owner keeps teardown
    pub fn into_parts(self) -> (String, EventStream, Unsubscribe) {
        (self.path, self.events, self.handle)
    }
}

// ==============================================================================
// data store trait
// ==============================================================================

#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    /// start receiving values for `path`; the current value (if any) arrives first
    fn subscribe(&self, path: &str) -> Result<Subscription, StoreError>;

    /// write `value` at `path`
    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError>;
}

// ==============================================================================
// in-process store
// ==============================================================================

type Sender = mpsc::UnboundedSender<Result<Value, StoreError>>;

#[derive(Default)]
struct StoreInner {
    values: HashMap<String, Value>,
    subscribers: HashMap<String, Vec<(u64, Sender)>>,
    next_id: u64,
    writes: Vec<(String, Value)>,
    write_failures: VecDeque<StoreError>,
    write_delay: Option<Duration>,
    write_attempts: usize,
    refused: HashMap<String, StoreError>,
}

impl StoreInner {
    fn notify(&mut self, path: &str, event: Result<Value, StoreError>) {
        if let Some(subs) = self.subscribers.get_mut(path) {
            subs.retain(|(_, tx)| tx.unbounded_send(event.clone()).is_ok());
        }
    }
}

/// realtime key-value store living in this process
///
/// backs the demo mode and the tests. cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // a panic while holding the lock leaves plain data behind; keep serving it
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// set a value as the remote side would, pushing it to every subscriber
    pub fn set(&self, path: &str, value: Value) {
        let mut inner = self.lock();
        inner.values.insert(path.to_string(), value.clone());
        inner.notify(path, Ok(value));
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.lock().values.get(path).cloned()
    }

    /// deliver a stream error to every subscriber of `path`
    pub fn push_error(&self, path: &str, error: StoreError) {
        self.lock().notify(path, Err(error));
    }

    /// the next writes fail with the queued errors, in order
    pub fn fail_next_write(&self, error: StoreError) {
        self.lock().write_failures.push_back(error);
    }

    /// every write sleeps this long before completing
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.lock().write_delay = delay;
    }

    /// make subsequent `subscribe` calls for `path` fail with `error`
    pub fn refuse_subscription(&self, path: &str, error: StoreError) {
        self.lock().refused.insert(path.to_string(), error);
    }

    /// successful writes, oldest first
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.lock().writes.clone()
    }

    /// writes attempted, including failed ones
    pub fn write_attempts(&self) -> usize {
        self.lock().write_attempts
    }

    pub fn subscriber_count(&self, path: &str) -> usize {
        self.lock().subscribers.get(path).map(Vec::len).unwrap_or(0)
    }

    pub fn total_subscribers(&self) -> usize {
        self.lock().subscribers.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded();
        let id = {
            let mut inner = self.lock();
            if let Some(err) = inner.refused.get(path).cloned() {
                return Err(err);
            }
            if let Some(value) = inner.values.get(path).cloned() {
                let _ = tx.unbounded_send(Ok(value));
            }
            inner.next_id += 1;
            let id = inner.next_id;
            inner
                .subscribers
                .entry(path.to_string())
                .or_default()
                .push((id, tx));
            id
        };

        let store = self.clone();
        let owned_path = path.to_string();
        let handle = Unsubscribe::new(move || {
            let mut inner = store.lock();
            if let Some(subs) = inner.subscribers.get_mut(&owned_path) {
                subs.retain(|(sub_id, _)| *sub_id != id);
                if subs.is_empty() {
                    inner.subscribers.remove(&owned_path);
                }
            }
        });

        Ok(Subscription::new(path, rx.boxed(), handle))
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let delay = {
            let mut inner = self.lock();
            inner.write_attempts += 1;
            inner.write_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if let Some(err) = inner.write_failures.pop_front() {
            return Err(err);
        }
        inner.writes.push((path.to_string(), value.clone()));
        inner.values.insert(path.to_string(), value.clone());
        inner.notify(path, Ok(value));
        Ok(())
    }
}
