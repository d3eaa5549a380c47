use serde::{Deserialize, Serialize};
use std::fmt;

// ==============================================================================
// keys
// ==============================================================================

/// the closed set of sensors the dashboard shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorKey {
    Light,
    AirHumidity,
    SoilMoisture,
    AirTemp,
}

impl SensorKey {
    pub const ALL: [SensorKey; 4] = [
        SensorKey::Light,
        SensorKey::AirHumidity,
        SensorKey::SoilMoisture,
        SensorKey::AirTemp,
    ];

    /// key as it appears in store paths and json
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKey::Light => "light",
            SensorKey::AirHumidity => "airHumidity",
            SensorKey::SoilMoisture => "soilMoisture",
            SensorKey::AirTemp => "airTemp",
        }
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// the closed set of actuators the operator can switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActuatorKey {
    Lamp,
    Fan,
    Pump,
}

impl ActuatorKey {
    pub const ALL: [ActuatorKey; 3] = [ActuatorKey::Lamp, ActuatorKey::Fan, ActuatorKey::Pump];

    pub fn as_str(self) -> &'static str {
        match self {
            ActuatorKey::Lamp => "lamp",
            ActuatorKey::Fan => "fan",
            ActuatorKey::Pump => "pump",
        }
    }

    /// human readable label shown next to the toggle
    pub fn display_name(self) -> &'static str {
        match self {
            ActuatorKey::Lamp => "Lamp",
            ActuatorKey::Fan => "Fan",
            ActuatorKey::Pump => "Pump",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for ActuatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Auto,
    Manual,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Mode::Auto),
            "manual" => Some(Mode::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Connected,
    Disconnected,
}

// ==============================================================================
// per-key tables
// ==============================================================================
// one field per key: a snapshot can never be missing a sensor or actuator.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorTable<T> {
    pub light: T,
    pub air_humidity: T,
    pub soil_moisture: T,
    pub air_temp: T,
}

impl<T> SensorTable<T> {
    pub fn from_fn(mut f: impl FnMut(SensorKey) -> T) -> Self {
        Self {
            light: f(SensorKey::Light),
            air_humidity: f(SensorKey::AirHumidity),
            soil_moisture: f(SensorKey::SoilMoisture),
            air_temp: f(SensorKey::AirTemp),
        }
    }

    pub fn get(&self, key: SensorKey) -> &T {
        match key {
            SensorKey::Light => &self.light,
            SensorKey::AirHumidity => &self.air_humidity,
            SensorKey::SoilMoisture => &self.soil_moisture,
            SensorKey::AirTemp => &self.air_temp,
        }
    }

    pub fn get_mut(&mut self, key: SensorKey) -> &mut T {
        match key {
            SensorKey::Light => &mut self.light,
            SensorKey::AirHumidity => &mut self.air_humidity,
            SensorKey::SoilMoisture => &mut self.soil_moisture,
            SensorKey::AirTemp => &mut self.air_temp,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActuatorTable<T> {
    pub lamp: T,
    pub fan: T,
    pub pump: T,
}

impl<T> ActuatorTable<T> {
    pub fn from_fn(mut f: impl FnMut(ActuatorKey) -> T) -> Self {
        Self {
            lamp: f(ActuatorKey::Lamp),
            fan: f(ActuatorKey::Fan),
            pump: f(ActuatorKey::Pump),
        }
    }

    pub fn get(&self, key: ActuatorKey) -> &T {
        match key {
            ActuatorKey::Lamp => &self.lamp,
            ActuatorKey::Fan => &self.fan,
            ActuatorKey::Pump => &self.pump,
        }
    }

    pub fn get_mut(&mut self, key: ActuatorKey) -> &mut T {
        match key {
            ActuatorKey::Lamp => &mut self.lamp,
            ActuatorKey::Fan => &mut self.fan,
            ActuatorKey::Pump => &mut self.pump,
        }
    }
}

// ==============================================================================
// snapshot
// ==============================================================================

/// latest reading of one sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    /// epoch milliseconds reported by the source
    pub timestamp: u64,
}

/// one point of a sensor's time series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: u64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorState {
    pub name: String,
    pub is_on: bool,
}

/// the single canonical state read by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub current: SensorTable<Reading>,
    pub series: SensorTable<Vec<SeriesPoint>>,
    pub actuators: ActuatorTable<ActuatorState>,
    pub mode: Mode,
    pub connection_status: ConnectionStatus,
}

impl Snapshot {
    /// deterministic start state: every sensor at 0 stamped `now_ms`,
    /// empty series, every actuator off, auto mode, connected
    pub fn initial(now_ms: u64) -> Self {
        Self {
            current: SensorTable::from_fn(|_| Reading {
                value: 0.0,
                timestamp: now_ms,
            }),
            series: SensorTable::default(),
            actuators: ActuatorTable::from_fn(|key| ActuatorState {
                name: key.display_name().to_string(),
                is_on: false,
            }),
            mode: Mode::Auto,
            connection_status: ConnectionStatus::Connected,
        }
    }

    /// next snapshot = this snapshot + deltas, applied in order
    pub fn with_deltas<'a>(&self, deltas: impl IntoIterator<Item = &'a Delta>) -> Snapshot {
        let mut next = self.clone();
        for delta in deltas {
            next.apply(delta);
        }
        next
    }

    pub(crate) fn apply(&mut self, delta: &Delta) {
        match delta {
            Delta::Current(key, reading) => *self.current.get_mut(*key) = *reading,
            Delta::Series(key, points) => *self.series.get_mut(*key) = points.clone(),
            Delta::Actuator(key, is_on) => self.actuators.get_mut(*key).is_on = *is_on,
            Delta::Mode(mode) => self.mode = *mode,
        }
    }
}

// ==============================================================================
// deltas
// ==============================================================================

/// a pending change to one leaf of the snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Current(SensorKey, Reading),
    /// full replacement of a sensor's series
    Series(SensorKey, Vec<SeriesPoint>),
    Actuator(ActuatorKey, bool),
    Mode(Mode),
}

impl Delta {
    /// dotted path of the leaf this delta writes (`current.light`, `mode`, ...)
    pub fn path(&self) -> String {
        match self {
            Delta::Current(key, _) => format!("current.{}", key),
            Delta::Series(key, _) => format!("series.{}", key),
            Delta::Actuator(key, _) => format!("actuators.{}", key),
            Delta::Mode(_) => "mode".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot_is_fully_populated() {
        let snap = Snapshot::initial(42);
        for key in SensorKey::ALL {
            assert_eq!(snap.current.get(key).timestamp, 42);
            assert!(snap.series.get(key).is_empty());
        }
        for key in ActuatorKey::ALL {
            assert!(!snap.actuators.get(key).is_on);
        }
        assert_eq!(snap.mode, Mode::Auto);
        assert_eq!(snap.connection_status, ConnectionStatus::Connected);
    }

    #[test]
    fn test_snapshot_json_uses_dashboard_field_names() {
        let json = serde_json::to_value(Snapshot::initial(7)).unwrap();
        assert_eq!(json["current"]["airHumidity"]["timestamp"], 7);
        assert_eq!(json["actuators"]["fan"]["isOn"], false);
        assert_eq!(json["connectionStatus"], "connected");
        assert_eq!(json["mode"], "auto");
    }

    #[test]
    fn test_with_deltas_leaves_original_untouched() {
        let base = Snapshot::initial(0);
        let next = base.with_deltas(&[
            Delta::Actuator(ActuatorKey::Fan, true),
            Delta::Mode(Mode::Manual),
        ]);
        assert!(!base.actuators.fan.is_on);
        assert!(next.actuators.fan.is_on);
        assert_eq!(next.mode, Mode::Manual);
    }

    #[test]
    fn test_delta_paths_are_distinct_per_namespace() {
        assert_eq!(Delta::Current(SensorKey::AirTemp, Reading::default()).path(), "current.airTemp");
        assert_eq!(Delta::Series(SensorKey::AirTemp, vec![]).path(), "series.airTemp");
        assert_eq!(Delta::Actuator(ActuatorKey::Pump, true).path(), "actuators.pump");
    }
}
