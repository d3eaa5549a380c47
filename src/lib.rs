//! ==============================================================================
//! lib.rs - sync host library
//! ==============================================================================
//!
//! the realtime synchronization engine and the pieces it is built from. the
//! binary in main.rs only wires these together.
//!
//! leaf-first:
//!     clock, error, domain, payload, store    shared vocabulary + store seam
//!     rate_limit, dedupe                      outbound command shaping
//!     coalescer, batch                        inbound update smoothing
//!     state, staleness                        the live snapshot + silence check
//!     engine                                  ties all of the above together
//!     config, demo, server                    host-side plumbing
//!
//! ==============================================================================

pub mod batch;
pub mod clock;
pub mod coalescer;
pub mod config;
pub mod dedupe;
pub mod demo;
pub mod domain;
pub mod engine;
pub mod error;
pub mod payload;
pub mod rate_limit;
pub mod server;
pub mod staleness;
pub mod state;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use config::{EngineConfig, HostConfig};
pub use domain::{ActuatorKey, ConnectionStatus, Mode, SensorKey, Snapshot};
pub use engine::SyncEngine;
pub use error::{StoreError, SyncError};
pub use store::{DataStore, MemoryStore, Subscription, Unsubscribe};
