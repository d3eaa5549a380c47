//! ==============================================================================
//! clock.rs - wall-clock capability for the sync engine
//! ==============================================================================
//!
//! purpose:
//!     every timestamp the engine compares (staleness, rate limit window,
//!     dedupe ttl, defaulted payload timestamps) comes from a `Clock`.
//!
//! relationships:
//!     - used by: engine.rs, staleness.rs, rate_limit.rs, dedupe.rs, demo.rs
//!
//! ==============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// source of unix epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// wall clock; reads the system time on every call
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        epoch_ms()
    }
}

/// epoch clock anchored to `tokio::time::Instant`
///
/// reads the system time once, then advances with tokio's monotonic clock, so
/// under `tokio::time::pause()` it moves with `advance` and auto-advance. it
/// drifts from the wall clock over long runs; use `SystemClock` in production.
#[derive(Debug, Clone)]
pub struct TokioClock {
    base_epoch_ms: u64,
    base: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base_epoch_ms: epoch_ms(),
            base: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.base_epoch_ms + self.base.elapsed().as_millis() as u64
    }
}

/// hand-driven clock for unit tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
