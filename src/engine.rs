//! ==============================================================================
//! engine.rs - realtime state synchronization controller
//! ==============================================================================
//!
//! purpose:
//!     owns the canonical snapshot and everything that mutates it.
//!
//! inbound (store -> snapshot):
//!     sensors/{k}/current   decode -> coalesce "sensor-{k}" -> batch
//!     sensors/{k}/series    decode -> coalesce "series-{k}" -> batch (non-empty only)
//!     actuators/{k}/state   applied immediately
//!     system/mode           applied immediately
//!
//! outbound (ui -> store):
//!     set_actuator      rate limit -> optimistic apply -> dedupe -> write (+1 retry)
//!                       -> revert on failure if the snapshot still shows our value
//!     set_mode          optimistic apply -> dedupe -> single write -> revert on failure
//!     set_all_actuators optimistic apply to all -> concurrent writes, no rollback
//!
//! lifecycle:
//!     start() opens every subscription it can; a path the store refuses is
//!     logged and left inert. shutdown() releases each one exactly once and
//!     stops every timer. writes already in flight run to completion
//!     but can no longer touch the snapshot.
//!
//! relationships:
//!     - uses: coalescer.rs, batch.rs, staleness.rs, rate_limit.rs, dedupe.rs
//!     - uses: store.rs (DataStore), payload.rs (paths + shapes)
//!     - used by: server.rs, main.rs
//!
//! ==============================================================================

use crate::batch::BatchMutator;
use crate::clock::Clock;
use crate::coalescer::Coalescer;
use crate::config::EngineConfig;
use crate::dedupe::Deduplicator;
use crate::domain::{ActuatorKey, Delta, Mode, SensorKey, Snapshot};
use crate::error::SyncError;
use crate::payload;
use crate::rate_limit::RateLimiter;
use crate::staleness::StalenessMonitor;
use crate::state::SharedSnapshot;
use crate::store::{DataStore, EventStream, Unsubscribe};

use futures::future::join_all;
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Inner {
    store: Arc<dyn DataStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    state: SharedSnapshot,
    coalescer: Coalescer,
    batch: BatchMutator,
    staleness: StalenessMonitor,
    limiter: RateLimiter,
    dedupe: Deduplicator<()>,
    closed: Arc<AtomicBool>,
    subscriptions: Mutex<Vec<Unsubscribe>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

/// handle to a running engine; clones share the same engine
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    /// build the engine and subscribe to every store path it mirrors
    ///
    /// a path whose subscription cannot be established is logged and skipped;
    /// its data stays at the initial values until staleness handles it.
    pub fn start(store: Arc<dyn DataStore>, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let state = SharedSnapshot::new(Snapshot::initial(clock.now_ms()));
        let closed = Arc::new(AtomicBool::new(false));

        let batch = {
            let state = state.clone();
            let closed = closed.clone();
            BatchMutator::new(
                config.batch_window(),
                Arc::new(move |deltas: Vec<Delta>| {
                    if closed.load(Ordering::SeqCst) {
                        return;
                    }
                    state.replace_with(|s| Some(s.with_deltas(&deltas)));
                }),
            )
        };

        let staleness = StalenessMonitor::spawn(
            state.clone(),
            clock.clone(),
            config.staleness_period(),
            config.staleness_threshold(),
        );

        let inner = Arc::new(Inner {
            limiter: RateLimiter::new(
                config.rate_limit_capacity,
                config.rate_limit_window(),
                clock.clone(),
            ),
            dedupe: Deduplicator::new(config.dedupe_ttl(), clock.clone()),
            coalescer: Coalescer::new(),
            store,
            clock,
            config,
            state,
            batch,
            staleness,
            closed,
            subscriptions: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        });

        let engine = SyncEngine { inner };
        engine.open_subscriptions();

        info!(
            "[ENGINE] Started with {} subscriptions",
            engine.inner.lock_subscriptions().len()
        );
        engine
    }

    // ==========================================================================
    // inbound
    // ==========================================================================

    fn open_subscriptions(&self) {
        for key in SensorKey::ALL {
            self.listen(payload::current_path(key), move |inner, value| {
                inner.on_current(key, value)
            });
            self.listen(payload::series_path(key), move |inner, value| {
                inner.on_series(key, value)
            });
        }
        for key in ActuatorKey::ALL {
            self.listen(payload::actuator_state_path(key), move |inner, value| {
                inner.on_actuator_state(key, value)
            });
        }
        self.listen(payload::MODE_PATH.to_string(), |inner, value| {
            inner.on_mode(value)
        });
    }

    /// subscribe to `path` and drain it on its own task
    fn listen<F>(&self, path: String, on_value: F)
    where
        F: Fn(&Inner, Value) + Send + 'static,
    {
        let subscription = match self.inner.store.subscribe(&path) {
            Ok(subscription) => subscription,
            Err(source) => {
                let e = SyncError::Subscription { path, source };
                warn!("[ENGINE] {} - path left inert", e);
                return;
            }
        };
        let (path, events, handle) = subscription.into_parts();
        self.inner.lock_subscriptions().push(handle);

        let task = spawn_listener(Arc::downgrade(&self.inner), path, events, on_value);
        self.inner.lock_listeners().push(task);
    }

    // ==========================================================================
    // reads
    // ==========================================================================

    /// owned copy of the current snapshot
    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.get()
    }

    /// change feed of the snapshot
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.inner.is_closed()
    }

    // ==========================================================================
    // outbound
    // ==========================================================================

    /// switch between automatic and manual control
    pub async fn set_mode(&self, mode: Mode) -> Result<(), SyncError> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(SyncError::Stopped);
        }

        let previous = inner.state.read(|s| s.mode);
        inner.apply_now(Delta::Mode(mode));

        let store = inner.store.clone();
        let result = inner
            .dedupe
            .dedupe_request("mode", mode.as_str(), move || {
                write_once(store, payload::MODE_PATH.to_string(), payload::encode_mode(mode))
            })
            .await;

        if let Err(e) = &result {
            warn!("[ENGINE] Mode change to {} failed: {}", mode.as_str(), e);
            inner.revert_if(|s| s.mode == mode, Delta::Mode(previous));
        }
        result
    }

    /// command one actuator
    pub async fn set_actuator(&self, key: ActuatorKey, on: bool) -> Result<(), SyncError> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(SyncError::Stopped);
        }
        inner.admit()?;

        let previous = inner.state.read(|s| s.actuators.get(key).is_on);
        inner.apply_now(Delta::Actuator(key, on));

        let result = inner.send_command(key, on).await;
        if let Err(e) = &result {
            warn!("[ENGINE] {} command failed: {}", key.display_name(), e);
            inner.revert_if(
                |s| s.actuators.get(key).is_on == on,
                Delta::Actuator(key, previous),
            );
        }
        result
    }

    /// command every actuator at once
    ///
    /// counts as a single command against the rate limit. failures are
    /// reported but the optimistic state is left in place.
    pub async fn set_all_actuators(&self, on: bool) -> Result<(), SyncError> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(SyncError::Stopped);
        }
        inner.admit()?;

        inner.state.replace_with(|s| {
            let deltas: Vec<Delta> = ActuatorKey::ALL
                .into_iter()
                .map(|key| Delta::Actuator(key, on))
                .collect();
            Some(s.with_deltas(&deltas))
        });

        let results = join_all(ActuatorKey::ALL.map(|key| inner.send_command(key, on))).await;
        match results.into_iter().find_map(Result::err) {
            Some(e) => {
                warn!("[ENGINE] Bulk command failed: {}", e);
                Err(e)
            }
            None => Ok(()),
        }
    }

    // ==========================================================================
    // teardown
    // ==========================================================================

    /// stop the engine; safe to call more than once
    pub fn shutdown(&self) {
        if self.inner.teardown() {
            info!("[ENGINE] Stopped");
        }
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Vec<Unsubscribe>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_current(&self, key: SensorKey, value: Value) {
        match payload::decode_current(&value, self.clock.now_ms()) {
            Ok(reading) => {
                let batch = self.batch.clone();
                self.coalescer.schedule(
                    format!("sensor-{}", key),
                    self.config.sensor_debounce(),
                    move || batch.enqueue(Delta::Current(key, reading)),
                );
            }
            Err(e) => warn!("[ENGINE] Ignoring {} current: {}", key, e),
        }
    }

    fn on_series(&self, key: SensorKey, value: Value) {
        let decoded = payload::decode_series(
            &value,
            self.clock.now_ms(),
            self.config.series_window_ms,
            self.config.max_series_points,
        );
        match decoded {
            Ok(points) => {
                let batch = self.batch.clone();
                self.coalescer.schedule(
                    format!("series-{}", key),
                    self.config.series_debounce(),
                    move || {
                        // an empty window keeps what is already on screen
                        if !points.is_empty() {
                            batch.enqueue(Delta::Series(key, points));
                        }
                    },
                );
            }
            Err(e) => warn!("[ENGINE] Ignoring {} series: {}", key, e),
        }
    }

    fn on_actuator_state(&self, key: ActuatorKey, value: Value) {
        match payload::decode_actuator_state(&value) {
            Ok(is_on) => self.apply_now(Delta::Actuator(key, is_on)),
            Err(e) => warn!("[ENGINE] Ignoring {} state: {}", key, e),
        }
    }

    fn on_mode(&self, value: Value) {
        self.apply_now(Delta::Mode(payload::decode_mode(&value)));
    }

    fn apply_now(&self, delta: Delta) {
        if self.is_closed() {
            return;
        }
        self.state.replace_with(|s| Some(s.with_deltas([&delta])));
    }

    /// apply `delta` only while `still_ours` holds for the live snapshot
    fn revert_if(&self, still_ours: impl FnOnce(&Snapshot) -> bool, delta: Delta) {
        if self.is_closed() {
            return;
        }
        self.state.replace_with(|s| {
            if still_ours(s) {
                Some(s.with_deltas([&delta]))
            } else {
                None
            }
        });
    }

    fn admit(&self) -> Result<(), SyncError> {
        if self.limiter.admit() {
            Ok(())
        } else {
            let retry_after = self.limiter.retry_after();
            debug!("[ENGINE] Command rate limited for {:?}", retry_after);
            Err(SyncError::RateLimited { retry_after })
        }
    }

    async fn send_command(&self, key: ActuatorKey, on: bool) -> Result<(), SyncError> {
        let store = self.store.clone();
        let now = self.clock.now_ms();
        let request = if on { "on" } else { "off" };
        // one entry per actuator; a command for the other value replaces it
        self.dedupe
            .dedupe_request(&format!("actuator-{}", key), request, move || {
                write_with_retry(
                    store,
                    payload::actuator_command_path(key),
                    payload::encode_command(on, now),
                )
            })
            .await
    }

    /// returns true the first time only
    fn teardown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        for mut handle in self.lock_subscriptions().drain(..) {
            handle.unsubscribe();
        }
        for task in self.lock_listeners().drain(..) {
            task.abort();
        }
        self.coalescer.shutdown();
        self.batch.shutdown();
        self.staleness.stop();
        self.dedupe.clear();
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn spawn_listener<F>(
    inner: std::sync::Weak<Inner>,
    path: String,
    mut events: EventStream,
    on_value: F,
) -> JoinHandle<()>
where
    F: Fn(&Inner, Value) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if inner.is_closed() {
                break;
            }
            match event {
                Ok(value) => on_value(&inner, value),
                Err(e) => {
                    // data for this path stays frozen until staleness zeroes it
                    warn!("[ENGINE] Subscription {} failed: {}", path, e);
                    break;
                }
            }
        }
        debug!("[ENGINE] Listener for {} finished", path);
    })
}

/// a single write attempt
async fn write_once(
    store: Arc<dyn DataStore>,
    path: String,
    value: Value,
) -> Result<(), SyncError> {
    store
        .write(&path, value)
        .await
        .map_err(|source| SyncError::write(path.as_str(), source))
}

/// one write, plus a second attempt after any failure
async fn write_with_retry(
    store: Arc<dyn DataStore>,
    path: String,
    value: Value,
) -> Result<(), SyncError> {
    let first = match store.write(&path, value.clone()).await {
        Ok(()) => return Ok(()),
        Err(source) => SyncError::retryable(path.as_str(), source),
    };
    debug!("[ENGINE] Retrying write to {} after: {}", path, first);
    write_once(store, path, value).await
}
