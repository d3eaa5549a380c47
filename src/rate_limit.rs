//! ==============================================================================
//! rate_limit.rs - sliding-window admission for actuator commands
//! ==============================================================================
//!
//! purpose:
//!     caps outbound actuator commands at `capacity` per trailing window so a
//!     clicking operator cannot flood the store. refused calls leave no trace
//!     in the window.
//!
//! relationships:
//!     - uses: clock.rs
//!     - used by: engine.rs (checked before any optimistic change)
//!
//! ==============================================================================

use crate::clock::Clock;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// admits at most `capacity` requests per trailing `window`
///
/// timestamps older than the window are pruned lazily on each call.
pub struct RateLimiter {
    capacity: usize,
    window_ms: u64,
    clock: Arc<dyn Clock>,
    recent: Mutex<VecDeque<u64>>,
}

impl RateLimiter {
    pub fn new(capacity: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            window_ms: window.as_millis() as u64,
            clock,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn prune(&self, recent: &mut VecDeque<u64>, now: u64) {
        while let Some(&oldest) = recent.front() {
            if now.saturating_sub(oldest) >= self.window_ms {
                recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// record a request and return true if the window has room; otherwise
    /// return false without recording
    pub fn admit(&self) -> bool {
        let now = self.clock.now_ms();
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut recent, now);
        if recent.len() < self.capacity {
            recent.push_back(now);
            true
        } else {
            false
        }
    }

    /// time until the oldest recorded request leaves the window
    pub fn retry_after(&self) -> Duration {
        let now = self.clock.now_ms();
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut recent, now);
        match recent.front() {
            Some(&oldest) => {
                Duration::from_millis(self.window_ms.saturating_sub(now.saturating_sub(oldest)))
            }
            None => Duration::ZERO,
        }
    }
}
