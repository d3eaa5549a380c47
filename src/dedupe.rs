//! ==============================================================================
//! dedupe.rs - outbound request deduplication
//! ==============================================================================
//!
//! purpose:
//!     a burst of identical commands (double clicks, repeated "all on") should
//!     reach the store once. the first call for a key runs the request; every
//!     call for the same key within the ttl gets a clone of that same shared
//!     future and therefore the identical outcome.
//!
//! lifecycle of an entry:
//!     issued -> settled ok -> (ttl later) removed
//!     issued -> settled err -> removed at once
//!     an entry older than the ttl is replaced by the next call even if its
//!     cleanup has not run yet.
//!
//! requests: an entry remembers the request it was issued for. a call for
//! the same key but a different request (fan off after fan on) replaces it,
//! so the latest intent is always sent.
//!
//! relationships:
//!     - used by: engine.rs (actuator commands, mode writes)
//!
//! ==============================================================================

use crate::clock::Clock;
use crate::error::SyncError;

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// outcome handed to every caller of the same key
pub type SharedResult<T> = Shared<BoxFuture<'static, Result<T, SyncError>>>;

struct Entry<T: Clone> {
    request: String,
    result: SharedResult<T>,
    issued_at: u64,
    generation: u64,
    cleanup: JoinHandle<()>,
}

struct Table<T: Clone> {
    entries: HashMap<String, Entry<T>>,
    next_generation: u64,
}

pub struct Deduplicator<T: Clone> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    table: Arc<Mutex<Table<T>>>,
    closed: Arc<AtomicBool>,
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            table: Arc::new(Mutex::new(Table {
                entries: HashMap::new(),
                next_generation: 0,
            })),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table<T>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// run `factory` for `key` unless a live result for `key` already exists
    pub fn dedupe<F, Fut>(&self, key: &str, factory: F) -> SharedResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        self.dedupe_request(key, "", factory)
    }

    /// like `dedupe`, but a live entry is only reused when it was issued for
    /// the same `request`; otherwise `factory` runs and takes over the key
    pub fn dedupe_request<F, Fut>(&self, key: &str, request: &str, factory: F) -> SharedResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let now = self.clock.now_ms();
        let ttl_ms = self.ttl.as_millis() as u64;
        let mut table = self.lock();

        if let Some(entry) = table.entries.get(key) {
            let failed = matches!(entry.result.peek(), Some(Err(_)));
            if entry.request == request && !failed && now.saturating_sub(entry.issued_at) < ttl_ms {
                debug!("[DEDUPE] reusing result for {} ({})", key, request);
                return entry.result.clone();
            }
        }

        let result: SharedResult<T> = factory().boxed().shared();
        table.next_generation += 1;
        let generation = table.next_generation;

        // drives the request to completion even if every caller goes away,
        // then expires the entry: at once on failure, one ttl later on success
        let cleanup = {
            let result = result.clone();
            let table = Arc::downgrade(&self.table);
            let closed = self.closed.clone();
            let key = key.to_string();
            let ttl = self.ttl;
            tokio::spawn(async move {
                let outcome = result.await;
                if closed.load(Ordering::SeqCst) {
                    return;
                }
                if outcome.is_ok() {
                    tokio::time::sleep(ttl).await;
                }
                if let Some(table) = table.upgrade() {
                    let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
                    if table.entries.get(&key).map(|e| e.generation) == Some(generation) {
                        table.entries.remove(&key);
                    }
                }
            })
        };

        let entry = Entry {
            request: request.to_string(),
            result: result.clone(),
            issued_at: now,
            generation,
            cleanup,
        };
        if let Some(old) = table.entries.insert(key.to_string(), entry) {
            if old.result.peek().is_some() {
                old.cleanup.abort();
            }
        }
        result
    }

    /// number of live entries
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// drop every entry and cancel pending expiry timers
    ///
    /// requests still in flight keep running to completion; they are never
    /// registered again.
    pub fn clear(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut table = self.lock();
        for (_, entry) in table.entries.drain() {
            if entry.result.peek().is_some() {
                entry.cleanup.abort();
            }
        }
    }
}
