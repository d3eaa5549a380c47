//! end-to-end behaviour of the sync engine against the in-process store

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use sync_host::{
    ActuatorKey, Clock, ConnectionStatus, EngineConfig, MemoryStore, Mode, StoreError, SyncEngine,
    SyncError, TokioClock,
};

fn start(store: &MemoryStore) -> (SyncEngine, Arc<dyn Clock>) {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let engine = SyncEngine::start(
        Arc::new(store.clone()),
        EngineConfig::default(),
        clock.clone(),
    );
    (engine, clock)
}

async fn settle() {
    // longer than sensor debounce + series debounce + batch window
    tokio::time::sleep(Duration::from_millis(400)).await;
}

fn sent_commands(store: &MemoryStore, path: &str) -> Vec<bool> {
    store
        .writes()
        .into_iter()
        .filter(|(p, _)| p == path)
        .map(|(_, value)| value["isOn"].as_bool().unwrap())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn burst_of_readings_yields_one_update_with_last_value() {
    let store = MemoryStore::new();
    let (engine, clock) = start(&store);
    let mut rx = engine.subscribe();
    rx.borrow_and_update();

    for i in 0..10 {
        store.set(
            "sensors/airTemp/current",
            json!({"value": 20.0 + i as f64, "timestamp": clock.now_ms()}),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!rx.has_changed().unwrap());

    settle().await;
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().current.air_temp.value, 29.0);
    assert!(!rx.has_changed().unwrap());
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn readings_for_different_sensors_commit_together() {
    let store = MemoryStore::new();
    let (engine, clock) = start(&store);
    let mut rx = engine.subscribe();
    rx.borrow_and_update();

    let now = clock.now_ms();
    store.set("sensors/light/current", json!({"value": 700.0, "timestamp": now}));
    store.set("sensors/soilMoisture/current", json!({"value": 41.0, "timestamp": now}));
    settle().await;

    let snap = rx.borrow_and_update().clone();
    assert_eq!(snap.current.light.value, 700.0);
    assert_eq!(snap.current.soil_moisture.value, 41.0);
    assert!(!rx.has_changed().unwrap());
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn silent_source_goes_stale_then_recovers() {
    let store = MemoryStore::new();
    let (engine, clock) = start(&store);

    let t0 = clock.now_ms();
    for key in ["light", "airHumidity", "soilMoisture", "airTemp"] {
        store.set(
            &format!("sensors/{}/current", key),
            json!({"value": 50.0, "timestamp": t0}),
        );
        store.set(
            &format!("sensors/{}/series", key),
            json!([{"timestamp": t0, "value": 50.0}]),
        );
    }
    settle().await;
    assert_eq!(engine.snapshot().series.light.len(), 1);

    tokio::time::sleep(Duration::from_secs(62)).await;
    let snap = engine.snapshot();
    assert_eq!(snap.connection_status, ConnectionStatus::Disconnected);
    assert_eq!(snap.current.light.value, 0.0);
    assert_eq!(snap.current.light.timestamp, t0);
    assert!(snap.series.air_temp.is_empty());

    store.set(
        "sensors/light/current",
        json!({"value": 512.0, "timestamp": clock.now_ms()}),
    );
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let snap = engine.snapshot();
    assert_eq!(snap.connection_status, ConnectionStatus::Connected);
    assert_eq!(snap.current.light.value, 512.0);
    assert_eq!(snap.current.air_temp.value, 0.0);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn source_that_never_reports_disconnects() {
    let store = MemoryStore::new();
    let (engine, _) = start(&store);

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(engine.snapshot().connection_status, ConnectionStatus::Connected);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(engine.snapshot().connection_status, ConnectionStatus::Disconnected);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn failed_fan_command_rolls_back() {
    let store = MemoryStore::new();
    let (engine, _) = start(&store);
    store.fail_next_write(StoreError::rejected("permission denied"));
    store.fail_next_write(StoreError::rejected("permission denied"));

    let result = engine.set_actuator(ActuatorKey::Fan, true).await;

    assert!(matches!(result, Err(SyncError::Write { .. })));
    assert_eq!(store.write_attempts(), 2);
    assert!(!engine.snapshot().actuators.fan.is_on);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn transient_failures_exhaust_single_retry() {
    let store = MemoryStore::new();
    let (engine, _) = start(&store);
    store.fail_next_write(StoreError::unavailable("timeout"));
    store.fail_next_write(StoreError::unavailable("timeout"));

    let result = engine.set_actuator(ActuatorKey::Pump, true).await;

    assert!(matches!(result, Err(SyncError::Write { .. })));
    assert_eq!(store.write_attempts(), 2);
    assert!(!engine.snapshot().actuators.pump.is_on);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn empty_series_keeps_previous_points() {
    let store = MemoryStore::new();
    let (engine, clock) = start(&store);
    let now = clock.now_ms();

    store.set(
        "sensors/soilMoisture/series",
        json!([
            {"timestamp": now - 2_000, "value": 40.0},
            {"timestamp": now - 1_000, "value": 41.0}
        ]),
    );
    settle().await;
    assert_eq!(engine.snapshot().series.soil_moisture.len(), 2);

    store.set("sensors/soilMoisture/series", json!([]));
    settle().await;
    assert_eq!(engine.snapshot().series.soil_moisture.len(), 2);

    // points outside the 12h window count as empty too
    store.set(
        "sensors/soilMoisture/series",
        json!([{"timestamp": now - 13 * 3_600_000, "value": 1.0}]),
    );
    settle().await;
    assert_eq!(engine.snapshot().series.soil_moisture.len(), 2);

    store.set(
        "sensors/soilMoisture/series",
        json!({"-x": {"timestamp": clock.now_ms(), "value": 44.0}}),
    );
    settle().await;
    let series = engine.snapshot().series.soil_moisture;
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].value, 44.0);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn set_all_reports_failure_without_rollback() {
    let store = MemoryStore::new();
    let (engine, _) = start(&store);
    // the first command fails, then fails its retry too
    store.fail_next_write(StoreError::rejected("denied"));
    store.fail_next_write(StoreError::rejected("denied"));

    let result = engine.set_all_actuators(true).await;

    assert!(matches!(result, Err(SyncError::Write { .. })));
    let snap = engine.snapshot();
    assert!(snap.actuators.lamp.is_on);
    assert!(snap.actuators.fan.is_on);
    assert!(snap.actuators.pump.is_on);
    // the failed write was retried once and failed again
    assert_eq!(store.write_attempts(), 4);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn sixth_command_in_a_second_is_rate_limited() {
    let store = MemoryStore::new();
    let (engine, _) = start(&store);

    for i in 0..5 {
        engine
            .set_actuator(ActuatorKey::Lamp, i % 2 == 0)
            .await
            .unwrap();
    }
    let before = engine.snapshot();
    let err = engine.set_actuator(ActuatorKey::Fan, true).await.unwrap_err();

    match err {
        SyncError::RateLimited { retry_after } => {
            assert!(retry_after <= Duration::from_secs(1));
        }
        other => panic!("expected rate limit, got {:?}", other),
    }
    assert_eq!(engine.snapshot(), before);

    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.set_actuator(ActuatorKey::Fan, true).await.unwrap();
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn mode_from_store_and_from_operator() {
    let store = MemoryStore::new();
    store.set("system/mode", json!("manual"));
    let (engine, _) = start(&store);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(engine.snapshot().mode, Mode::Manual);

    engine.set_mode(Mode::Auto).await.unwrap();
    assert_eq!(store.get("system/mode"), Some(json!("auto")));
    assert_eq!(engine.snapshot().mode, Mode::Auto);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_every_subscription_once() {
    let store = MemoryStore::new();
    let (engine, clock) = start(&store);
    assert_eq!(store.total_subscribers(), 12);

    engine.shutdown();
    engine.shutdown();
    assert_eq!(store.total_subscribers(), 0);
    assert!(!engine.is_running());

    let before = engine.snapshot();
    store.set(
        "sensors/light/current",
        json!({"value": 900.0, "timestamp": clock.now_ms()}),
    );
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(engine.snapshot(), before);
    assert_eq!(
        engine.set_actuator(ActuatorKey::Lamp, true).await,
        Err(SyncError::Stopped)
    );
}

#[tokio::test(start_paused = true)]
async fn write_completing_after_shutdown_leaves_snapshot_alone() {
    let store = MemoryStore::new();
    let (engine, _) = start(&store);
    store.set_write_delay(Some(Duration::from_millis(200)));
    store.fail_next_write(StoreError::rejected("denied"));
    store.fail_next_write(StoreError::rejected("denied"));

    let pending = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.set_actuator(ActuatorKey::Pump, true).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.shutdown();

    assert!(pending.await.unwrap().is_err());
    // optimistic value stays; no revert after teardown
    assert!(engine.snapshot().actuators.pump.is_on);
}

#[tokio::test(start_paused = true)]
async fn refused_subscription_leaves_other_paths_live() {
    let store = MemoryStore::new();
    store.refuse_subscription("sensors/light/current", StoreError::rejected("no access"));
    let (engine, clock) = start(&store);

    assert!(engine.is_running());
    assert_eq!(store.total_subscribers(), 11);
    assert_eq!(store.subscriber_count("sensors/light/current"), 0);

    let now = clock.now_ms();
    store.set("sensors/light/current", json!({"value": 700.0, "timestamp": now}));
    store.set("sensors/airTemp/current", json!({"value": 31.5, "timestamp": now}));
    settle().await;

    let snap = engine.snapshot();
    assert_eq!(snap.current.air_temp.value, 31.5);
    assert_eq!(snap.current.light.value, 0.0);
    engine.set_actuator(ActuatorKey::Lamp, true).await.unwrap();
    engine.shutdown();
    assert_eq!(store.total_subscribers(), 0);
}

#[tokio::test(start_paused = true)]
async fn fan_on_off_on_within_ttl_sends_every_command() {
    let store = MemoryStore::new();
    let (engine, _) = start(&store);

    for on in [true, false, true] {
        engine.set_actuator(ActuatorKey::Fan, on).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(
        sent_commands(&store, "actuators/fan/command"),
        vec![true, false, true]
    );
    assert_eq!(store.get("actuators/fan/command").unwrap()["isOn"], true);
    assert!(engine.snapshot().actuators.fan.is_on);

    // the device echoes the last command; the snapshot agrees with it
    store.set("actuators/fan/state", json!({"isOn": true}));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(engine.snapshot().actuators.fan.is_on);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn command_retried_by_operator_after_failure_reaches_store() {
    let store = MemoryStore::new();
    let (engine, _) = start(&store);
    store.fail_next_write(StoreError::unavailable("offline"));
    store.fail_next_write(StoreError::unavailable("offline"));

    assert!(engine.set_actuator(ActuatorKey::Lamp, true).await.is_err());
    assert!(!engine.snapshot().actuators.lamp.is_on);

    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.set_actuator(ActuatorKey::Lamp, true).await.unwrap();

    assert_eq!(store.write_attempts(), 3);
    assert_eq!(sent_commands(&store, "actuators/lamp/command"), vec![true]);
    assert!(engine.snapshot().actuators.lamp.is_on);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn failed_mode_write_is_attempted_once() {
    let store = MemoryStore::new();
    let (engine, _) = start(&store);
    store.fail_next_write(StoreError::unavailable("timeout"));

    let result = engine.set_mode(Mode::Manual).await;

    assert!(matches!(result, Err(SyncError::Write { .. })));
    assert_eq!(store.write_attempts(), 1);
    assert_eq!(engine.snapshot().mode, Mode::Auto);
    engine.shutdown();
}
