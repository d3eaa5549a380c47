//! ==============================================================================
//! main.rs - sync host entry point
//! ==============================================================================
//!
//! purpose:
//!     runs the realtime sync engine behind a small json api for the dashboard.
//!
//! responsibilities:
//!     - load host.toml (or defaults) and install logging
//!     - create the realtime store the engine mirrors
//!     - start the demo device when enabled
//!     - start the engine and serve the api
//!     - tear everything down on ctrl-c
//!
//! architecture:
//!
//!     ┌───────────────────────────────────────────────────────────────┐
//!     │                       rust host (this file)                    │
//!     │  ┌─────────────┐    ┌─────────────┐    ┌───────────────────┐  │
//!     │  │ demo device │    │ sync engine │    │ web server        │  │
//!     │  │ (5s tick)   │    │             │    │ (port 3000)       │  │
//!     │  └──────┬──────┘    └──┬───────┬──┘    └─────────┬─────────┘  │
//!     │         │ writes       │ subs  │ snapshot        │            │
//!     │         ▼              ▼       └─────────────────┘            │
//!     │     ┌───────────────────────┐                                  │
//!     │     │ realtime store        │ <- store.rs                      │
//!     │     └───────────────────────┘                                  │
//!     └───────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use sync_host::config::HostConfig;
use sync_host::demo::DemoSource;
use sync_host::{server, Clock, MemoryStore, SyncEngine, SystemClock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let source = HostConfig::discover();
    let config = source.config();
    init_logging(&config.logging.level);

    println!("===========================================================");
    println!("  Realtime Sync Host");
    println!("  sensors in, commands out, one snapshot");
    println!("===========================================================");

    source.log();
    config.print_summary();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let store = MemoryStore::new();

    let demo = if config.demo.enabled {
        let device = DemoSource::new(
            store.clone(),
            clock.clone(),
            config.engine.max_series_points,
        );
        Some(device.spawn(Duration::from_secs(config.demo.interval_seconds)))
    } else {
        info!("[STARTUP] Demo device disabled; waiting for store writes");
        None
    };

    let engine = SyncEngine::start(Arc::new(store), config.engine.clone(), clock);
    info!("[STARTUP] ✓ Sync engine running");

    let server = {
        let engine = engine.clone();
        let bind = config.server.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run_server(&bind, engine).await {
                error!("[ERROR] Web server error: {}", e);
            }
        })
    };
    info!("[STARTUP] ✓ Dashboard api at http://{}/api", config.server.bind);

    tokio::signal::ctrl_c().await?;
    info!("[SHUTDOWN] Stopping");

    server.abort();
    if let Some(demo) = demo {
        demo.abort();
    }
    engine.shutdown();
    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
