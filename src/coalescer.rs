//! ==============================================================================
//! coalescer.rs - per-key trailing-edge debounce
//! ==============================================================================
//!
//! purpose:
//!     collapses a burst of events for the same key into one deferred action.
//!     every `schedule` for a key cancels the previous timer for that key and
//!     starts a fresh one; only the latest action fires, once, after the
//!     quiet period.
//!
//! invariants:
//!     - at most one armed timer per key
//!     - after `shutdown` nothing fires and nothing new can be armed
//!
//! key namespaces used by the engine:
//!     sensor-{key}  current value smoothing
//!     series-{key}  series smoothing
//!
//! relationships:
//!     - used by: engine.rs (inbound current + series events)
//!     - feeds: batch.rs (actions enqueue deltas)
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TimerTable {
    timers: HashMap<String, Timer>,
    next_generation: u64,
    closed: bool,
}

/// per-engine debounce timer table
#[derive(Clone, Default)]
pub struct Coalescer {
    table: Arc<Mutex<TimerTable>>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TimerTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// arm (or re-arm) the timer for `key`
    pub fn schedule<F>(&self, key: impl Into<String>, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let key = key.into();
        let mut table = self.lock();
        if table.closed {
            return;
        }

        table.next_generation += 1;
        let generation = table.next_generation;

        let weak = Arc::downgrade(&self.table);
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(table) = weak.upgrade() else {
                return;
            };
            // claim the slot; a newer schedule for the same key wins
            let fire = {
                let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
                match table.timers.get(&timer_key) {
                    Some(timer) if timer.generation == generation && !table.closed => {
                        table.timers.remove(&timer_key);
                        true
                    }
                    _ => false,
                }
            };
            if fire {
                action();
            }
        });

        if let Some(previous) = table.timers.insert(key, Timer { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// cancel the pending timer for `key`, if any
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().timers.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// number of armed timers
    pub fn pending(&self) -> usize {
        self.lock().timers.len()
    }

    /// cancel every timer and refuse new ones
    pub fn shutdown(&self) {
        let mut table = self.lock();
        table.closed = true;
        for (_, timer) in table.timers.drain() {
            timer.handle.abort();
        }
    }
}
