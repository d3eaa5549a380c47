//! ==============================================================================
//! state.rs - the live snapshot
//! ==============================================================================
//!
//! this holds the one canonical snapshot shared between:
//! - the subscription tasks and batch flushes (write new readings)
//! - the staleness sweep (zeroes stale readings, flips connection status)
//! - the ui-facing commands (optimistic writes and reverts)
//! - the web server (reads for the api)
//!
//! a tokio watch channel gives us:
//! - one writer at a time (every update runs under the channel's lock)
//! - readers that always see a whole snapshot, never half a merge
//! - change notification for anyone holding a receiver
//!
//! updates are snapshot-and-replace: the closure gets the current snapshot and
//! returns the next one; readers never observe an in-place edit in progress.
//!
//! ==============================================================================

use crate::domain::Snapshot;

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct SharedSnapshot {
    tx: Arc<watch::Sender<Snapshot>>,
}

impl SharedSnapshot {
    pub fn new(initial: Snapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// owned copy of the current snapshot
    pub fn get(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// inspect the current snapshot without cloning it
    pub fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// receiver that is notified on every published change
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// replace the snapshot with `f(current)` when it returns a different one
    ///
    /// returns true when a new snapshot was published.
    pub fn replace_with(&self, f: impl FnOnce(&Snapshot) -> Option<Snapshot>) -> bool {
        self.tx.send_if_modified(|current| match f(current) {
            Some(next) if next != *current => {
                *current = next;
                true
            }
            _ => false,
        })
    }
}
