//! ==============================================================================
//! error.rs - error taxonomy for the store and the engine
//! ==============================================================================
//!
//! purpose:
//!     `StoreError` is what a data store reports. `SyncError` is what the
//!     engine hands back to callers.
//!
//! write failures:
//!     first failed actuator command -> RetryableWrite (retried once)
//!     failed retry or mode write    -> Write (surfaced to the caller)
//!
//! relationships:
//!     - used by: store.rs, engine.rs, dedupe.rs, server.rs
//!
//! ==============================================================================

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a `DataStore` implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// transient failure (network, timeout)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// the store refused the request (permissions, validation)
    #[error("store rejected request: {0}")]
    Rejected(String),

    /// the subscription or store has been closed
    #[error("store closed")]
    Closed,

    /// payload could not be interpreted
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Errors surfaced by the engine to UI-facing callers.
///
/// `Clone` so that one deduplicated outcome can be handed to every caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// upstream stream failed to establish or delivered an unusable payload
    #[error("subscription to {path} failed: {source}")]
    Subscription { path: String, source: StoreError },

    /// outbound write failed; the optimistic change has been reverted
    #[error("write to {path} failed: {source}")]
    Write { path: String, source: StoreError },

    /// first failure of an actuator command, before its single retry
    #[error("write to {path} failed (retryable): {source}")]
    RetryableWrite { path: String, source: StoreError },

    /// actuator command refused by the outbound rate limiter
    #[error("rate limited, retry after {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    /// engine has been shut down
    #[error("sync engine stopped")]
    Stopped,
}

impl SyncError {
    /// final write failure
    pub fn write(path: impl Into<String>, source: StoreError) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// write failure that still has its retry ahead of it
    pub fn retryable(path: impl Into<String>, source: StoreError) -> Self {
        Self::RetryableWrite {
            path: path.into(),
            source,
        }
    }
}
