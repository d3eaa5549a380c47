//! ==============================================================================
//! batch.rs - batched snapshot mutation
//! ==============================================================================
//!
//! purpose:
//!     inbound updates arrive one key at a time. instead of publishing a new
//!     snapshot per key, deltas wait in a pending queue and are committed
//!     together when the shared flush timer fires.
//!
//! rules:
//!     - one pending delta per path; a later delta for the same path replaces
//!       the earlier one
//!     - the first enqueue into an empty window arms the flush timer; later
//!       enqueues ride along, so a steady stream still flushes once per window
//!     - a flush hands all deltas to the commit sink in enqueue order, as one
//!       transition; an empty flush does nothing
//!
//! relationships:
//!     - fed by: coalescer.rs actions (via engine.rs)
//!     - commits into: engine.rs snapshot channel
//!
//! ==============================================================================

use crate::domain::Delta;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// receives every non-empty flush
pub type CommitFn = Arc<dyn Fn(Vec<Delta>) + Send + Sync>;

#[derive(Default)]
struct PendingQueue {
    deltas: HashMap<String, (u64, Delta)>,
    next_seq: u64,
    timer: Option<JoinHandle<()>>,
    closed: bool,
}

#[derive(Clone)]
pub struct BatchMutator {
    window: Duration,
    queue: Arc<Mutex<PendingQueue>>,
    commit: CommitFn,
}

impl BatchMutator {
    pub fn new(window: Duration, commit: CommitFn) -> Self {
        Self {
            window,
            queue: Arc::new(Mutex::new(PendingQueue::default())),
            commit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// queue `delta` under its path and make sure a flush is scheduled
    pub fn enqueue(&self, delta: Delta) {
        let mut queue = self.lock();
        if queue.closed {
            return;
        }
        queue.next_seq += 1;
        let seq = queue.next_seq;
        queue.deltas.insert(delta.path(), (seq, delta));

        if queue.timer.is_none() {
            let this = self.clone();
            let window = self.window;
            queue.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(window).await;
                this.commit_pending(false);
            }));
        }
    }

    /// commit everything queued right now
    pub fn flush(&self) {
        self.commit_pending(true);
    }

    fn commit_pending(&self, cancel_timer: bool) {
        let deltas = {
            let mut queue = self.lock();
            if let Some(timer) = queue.timer.take() {
                if cancel_timer {
                    timer.abort();
                }
            }
            let mut drained: Vec<(u64, Delta)> = queue.deltas.drain().map(|(_, v)| v).collect();
            drained.sort_by_key(|(seq, _)| *seq);
            drained.into_iter().map(|(_, d)| d).collect::<Vec<_>>()
        };
        if deltas.is_empty() {
            return;
        }
        debug!("[BATCH] committing {} deltas", deltas.len());
        (self.commit)(deltas);
    }

    pub fn pending(&self) -> usize {
        self.lock().deltas.len()
    }

    /// cancel the flush timer and discard anything not yet committed
    pub fn shutdown(&self) {
        let mut queue = self.lock();
        queue.closed = true;
        queue.deltas.clear();
        if let Some(timer) = queue.timer.take() {
            timer.abort();
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActuatorKey, Mode, Reading, SensorKey};

    fn recording() -> (Arc<Mutex<Vec<Vec<Delta>>>>, BatchMutator) {
        let flushes = Arc::new(Mutex::new(Vec::new()));
        let sink = flushes.clone();
        let batch = BatchMutator::new(
            Duration::from_millis(50),
            Arc::new(move |deltas| sink.lock().unwrap().push(deltas)),
        );
        (flushes, batch)
    }

    fn reading(value: f64) -> Reading {
        Reading { value, timestamp: 1 }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disjoint_paths_land_in_one_flush() {
        let (flushes, batch) = recording();

        batch.enqueue(Delta::Current(SensorKey::Light, reading(10.0)));
        batch.enqueue(Delta::Actuator(ActuatorKey::Fan, true));
        batch.enqueue(Delta::Mode(Mode::Manual));
        tokio::time::sleep(Duration::from_millis(60)).await;

        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(
            flushes[0],
            vec![
                Delta::Current(SensorKey::Light, reading(10.0)),
                Delta::Actuator(ActuatorKey::Fan, true),
                Delta::Mode(Mode::Manual),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_leaf_keeps_latest_value() {
        let (flushes, batch) = recording();

        batch.enqueue(Delta::Current(SensorKey::AirTemp, reading(20.0)));
        batch.enqueue(Delta::Current(SensorKey::AirTemp, reading(21.0)));
        assert_eq!(batch.pending(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(
            *flushes.lock().unwrap(),
            vec![vec![Delta::Current(SensorKey::AirTemp, reading(21.0))]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_stream_flushes_once_per_window() {
        let (flushes, batch) = recording();

        for i in 0..10 {
            batch.enqueue(Delta::Current(SensorKey::Light, reading(i as f64)));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 2);
        assert_eq!(flushes[1], vec![Delta::Current(SensorKey::Light, reading(9.0))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_flush_is_noop() {
        let (flushes, batch) = recording();
        batch.flush();
        batch.flush();
        assert!(flushes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_flush_cancels_timer() {
        let (flushes, batch) = recording();
        batch.enqueue(Delta::Mode(Mode::Manual));
        batch.flush();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(flushes.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_pending() {
        let (flushes, batch) = recording();
        batch.enqueue(Delta::Actuator(ActuatorKey::Pump, true));
        batch.shutdown();
        batch.enqueue(Delta::Actuator(ActuatorKey::Pump, false));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(flushes.lock().unwrap().is_empty());
        assert_eq!(batch.pending(), 0);
    }
}
