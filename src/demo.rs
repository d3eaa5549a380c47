//! ==============================================================================
//! demo.rs - offline device simulator
//! ==============================================================================
//!
//! purpose:
//!     stands in for the field device when there is no hosted database. on every
//!     tick it plays the device's part against the in-process store:
//!     - publishes a new current reading per sensor
//!     - appends the reading to that sensor's series
//!     - reports actuator state, either following the operator's commands
//!       (manual) or its own thresholds (auto)
//!
//! the engine cannot tell this apart from a real device; it only sees store
//! events.
//!
//! relationships:
//!     - writes: store.rs (MemoryStore), in payload.rs shapes
//!     - spawned by: main.rs when `[demo] enabled = true`
//!
//! ==============================================================================

use crate::clock::Clock;
use crate::domain::{ActuatorKey, ActuatorTable, Mode, Reading, SensorKey, SensorTable, SeriesPoint};
use crate::payload;
use crate::store::MemoryStore;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// auto-mode switching points
const LAMP_ON_BELOW_LUX: f64 = 300.0;
const FAN_ON_ABOVE_CELSIUS: f64 = 30.0;
const PUMP_ON_BELOW_MOISTURE: f64 = 35.0;

/// (midpoint, amplitude, phase) of each simulated signal
fn wave(key: SensorKey) -> (f64, f64, f64) {
    match key {
        SensorKey::Light => (550.0, 400.0, 0.0),
        SensorKey::AirHumidity => (68.0, 12.0, 1.3),
        SensorKey::SoilMoisture => (45.0, 15.0, 2.1),
        SensorKey::AirTemp => (28.0, 4.5, 3.4),
    }
}

/// simulated reading of `key` after `tick` simulated minutes
///
/// one full day per 1440 ticks, with a small faster ripple on top.
pub fn sensor_value(key: SensorKey, tick: u64) -> f64 {
    let (mid, amp, phase) = wave(key);
    let t = tick as f64;
    let day = (t / 1440.0 * std::f64::consts::TAU + phase).sin();
    let ripple = (t / 7.0 + phase * 2.0).sin() * amp * 0.05;
    ((mid + amp * day + ripple) * 10.0).round() / 10.0
}

pub struct DemoSource {
    store: MemoryStore,
    clock: Arc<dyn Clock>,
    tick: u64,
    /// tick offset so a fresh demo starts in daylight
    start_tick: u64,
    max_series_points: usize,
    series: SensorTable<Vec<SeriesPoint>>,
    reported: ActuatorTable<Option<bool>>,
}

impl DemoSource {
    pub fn new(store: MemoryStore, clock: Arc<dyn Clock>, max_series_points: usize) -> Self {
        Self {
            store,
            clock,
            tick: 0,
            start_tick: 360,
            max_series_points,
            series: SensorTable::default(),
            reported: ActuatorTable::default(),
        }
    }

    /// play one device tick against the store
    pub fn step(&mut self) {
        let now = self.clock.now_ms();
        let sim_tick = self.start_tick + self.tick;
        self.tick += 1;

        let readings = SensorTable::from_fn(|key| Reading {
            value: sensor_value(key, sim_tick),
            timestamp: now,
        });

        for key in SensorKey::ALL {
            let reading = *readings.get(key);
            self.store
                .set(&payload::current_path(key), payload::encode_current(reading));

            let series = self.series.get_mut(key);
            series.push(SeriesPoint {
                timestamp: now,
                value: reading.value,
            });
            if series.len() > self.max_series_points {
                let excess = series.len() - self.max_series_points;
                series.drain(..excess);
            }
            self.store
                .set(&payload::series_path(key), payload::encode_series(series));
        }

        let mode = self
            .store
            .get(payload::MODE_PATH)
            .map(|v| payload::decode_mode(&v))
            .unwrap_or_default();

        for key in ActuatorKey::ALL {
            let wanted = match mode {
                Mode::Manual => self.commanded(key),
                Mode::Auto => Some(auto_decision(key, &readings)),
            };
            if let Some(is_on) = wanted {
                self.report(key, is_on);
            }
        }

        debug!(
            "[DEMO] tick {} light={:.1} temp={:.1} mode={}",
            self.tick,
            readings.light.value,
            readings.air_temp.value,
            mode.as_str()
        );
    }

    /// last command written for `key`, if any
    fn commanded(&self, key: ActuatorKey) -> Option<bool> {
        self.store
            .get(&payload::actuator_command_path(key))
            .and_then(|v| payload::decode_actuator_state(&v).ok())
    }

    fn report(&mut self, key: ActuatorKey, is_on: bool) {
        let slot = self.reported.get_mut(key);
        if *slot == Some(is_on) {
            return;
        }
        *slot = Some(is_on);
        info!(
            "[DEMO] {} -> {}",
            key.display_name(),
            if is_on { "ON" } else { "OFF" }
        );
        self.store
            .set(&payload::actuator_state_path(key), json!({ "isOn": is_on }));
    }

    /// run `step` every `period` until the handle is aborted
    pub fn spawn(mut self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("[DEMO] Simulating device ({}s tick)", period.as_secs());
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.step();
            }
        })
    }
}

fn auto_decision(key: ActuatorKey, readings: &SensorTable<Reading>) -> bool {
    match key {
        ActuatorKey::Lamp => readings.light.value < LAMP_ON_BELOW_LUX,
        ActuatorKey::Fan => readings.air_temp.value > FAN_ON_ABOVE_CELSIUS,
        ActuatorKey::Pump => readings.soil_moisture.value < PUMP_ON_BELOW_MOISTURE,
    }
}
