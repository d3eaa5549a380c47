//! ==============================================================================
//! staleness.rs - detecting silence
//! ==============================================================================
//!
//! purpose:
//!     a sensor that stops publishing produces no events at all, so nothing in
//!     the inbound path can notice it. a periodic sweep compares each sensor's
//!     last timestamp with the clock instead.
//!
//! policy:
//!     - stale: now - timestamp > threshold. value drops to 0, timestamp kept
//!     - disconnected only when every sensor is stale
//!     - connected again as soon as any sensor is fresh
//!     - entering disconnected clears all series; leaving it does not touch them
//!     - nothing is published unless a value or the status actually changed
//!
//! relationships:
//!     - reads/writes: state.rs (SharedSnapshot)
//!     - spawned by: engine.rs
//!
//! ==============================================================================

use crate::clock::Clock;
use crate::domain::{ConnectionStatus, SensorKey, Snapshot};
use crate::state::SharedSnapshot;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// apply the staleness policy to `snapshot` at time `now_ms`
///
/// returns the next snapshot, or `None` when nothing would change.
pub fn sweep(snapshot: &Snapshot, now_ms: u64, threshold_ms: u64) -> Option<Snapshot> {
    let is_stale = |key: SensorKey| {
        now_ms.saturating_sub(snapshot.current.get(key).timestamp) > threshold_ms
    };

    let to_zero: Vec<SensorKey> = SensorKey::ALL
        .into_iter()
        .filter(|&key| is_stale(key) && snapshot.current.get(key).value != 0.0)
        .collect();
    let all_stale = SensorKey::ALL.into_iter().all(is_stale);

    let next_status = match (all_stale, snapshot.connection_status) {
        (true, ConnectionStatus::Connected) => Some(ConnectionStatus::Disconnected),
        (false, ConnectionStatus::Disconnected) => Some(ConnectionStatus::Connected),
        _ => None,
    };

    if to_zero.is_empty() && next_status.is_none() {
        return None;
    }

    let mut next = snapshot.clone();
    for key in to_zero {
        next.current.get_mut(key).value = 0.0;
    }
    if let Some(status) = next_status {
        next.connection_status = status;
        if status == ConnectionStatus::Disconnected {
            for key in SensorKey::ALL {
                next.series.get_mut(key).clear();
            }
        }
    }
    Some(next)
}

/// background sweep task
pub struct StalenessMonitor {
    handle: JoinHandle<()>,
}

impl StalenessMonitor {
    pub fn spawn(
        state: SharedSnapshot,
        clock: Arc<dyn Clock>,
        period: Duration,
        threshold: Duration,
    ) -> Self {
        let threshold_ms = threshold.as_millis() as u64;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let now = clock.now_ms();
                let before = state.read(|s| s.connection_status);
                if state.replace_with(|s| sweep(s, now, threshold_ms)) {
                    let after = state.read(|s| s.connection_status);
                    match (before, after) {
                        (ConnectionStatus::Connected, ConnectionStatus::Disconnected) => {
                            warn!("[STALE] no sensor updated within {}ms, marking disconnected", threshold_ms)
                        }
                        (ConnectionStatus::Disconnected, ConnectionStatus::Connected) => {
                            info!("[STALE] fresh data seen, marking connected")
                        }
                        _ => {}
                    }
                }
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for StalenessMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
