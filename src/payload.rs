//! ==============================================================================
//! payload.rs - store paths and payload shapes
//! ==============================================================================
//!
//! purpose:
//!     translates between raw json values living in the realtime store and the
//!     typed domain values the engine works with.
//!
//! inbound policy:
//!     - missing `value` / `timestamp` are defaulted (0 / now), never rejected
//!     - a payload of the wrong shape altogether is a `StoreError::Malformed`
//!     - series accept an array or an object of points (push-id keyed lists)
//!
//! path layout:
//!     sensors/{sensor}/current    -> {value, timestamp}
//!     sensors/{sensor}/series     -> [{timestamp, value}, ...]
//!     actuators/{actuator}/state  -> {isOn}
//!     actuators/{actuator}/command-> {isOn, timestamp}
//!     system/mode                 -> "auto" | "manual" (or legacy {mode})
//!
//! ==============================================================================

use crate::domain::{ActuatorKey, Mode, Reading, SensorKey, SeriesPoint};
use crate::error::StoreError;
use serde_json::{json, Value};

pub const MODE_PATH: &str = "system/mode";

pub fn current_path(key: SensorKey) -> String {
    format!("sensors/{}/current", key)
}

pub fn series_path(key: SensorKey) -> String {
    format!("sensors/{}/series", key)
}

pub fn actuator_state_path(key: ActuatorKey) -> String {
    format!("actuators/{}/state", key)
}

pub fn actuator_command_path(key: ActuatorKey) -> String {
    format!("actuators/{}/command", key)
}

// ==============================================================================
// inbound
// ==============================================================================

/// decode `sensors/{k}/current`
pub fn decode_current(value: &Value, now_ms: u64) -> Result<Reading, StoreError> {
    let obj = value
        .as_object()
        .ok_or_else(|| StoreError::Malformed(format!("expected object, got {}", value)))?;
    Ok(Reading {
        value: obj.get("value").and_then(Value::as_f64).unwrap_or(0.0),
        timestamp: obj.get("timestamp").and_then(as_timestamp).unwrap_or(now_ms),
    })
}

/// decode `sensors/{k}/series`
///
/// points without a usable timestamp are dropped, the rest are kept only when
/// inside the trailing `window_ms`, sorted ascending and capped to the newest
/// `max_points`. `null` decodes to an empty list.
pub fn decode_series(
    value: &Value,
    now_ms: u64,
    window_ms: u64,
    max_points: usize,
) -> Result<Vec<SeriesPoint>, StoreError> {
    let raw: Vec<&Value> = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        other => {
            return Err(StoreError::Malformed(format!(
                "expected series list, got {}",
                other
            )))
        }
    };

    let cutoff = now_ms.saturating_sub(window_ms);
    let mut points: Vec<SeriesPoint> = raw
        .into_iter()
        .filter_map(|p| {
            let timestamp = p.get("timestamp").and_then(as_timestamp)?;
            if timestamp == 0 || timestamp < cutoff {
                return None;
            }
            Some(SeriesPoint {
                timestamp,
                value: p.get("value").and_then(Value::as_f64).unwrap_or(0.0),
            })
        })
        .collect();

    points.sort_by_key(|p| p.timestamp);
    if points.len() > max_points {
        points.drain(..points.len() - max_points);
    }
    Ok(points)
}

/// decode `actuators/{k}/state`
pub fn decode_actuator_state(value: &Value) -> Result<bool, StoreError> {
    match value {
        Value::Object(obj) => Ok(obj.get("isOn").and_then(Value::as_bool).unwrap_or(false)),
        Value::Bool(on) => Ok(*on),
        other => Err(StoreError::Malformed(format!(
            "expected actuator state, got {}",
            other
        ))),
    }
}

/// decode `system/mode`: plain string, or `{mode}` for older writers;
/// anything unrecognised falls back to auto
pub fn decode_mode(value: &Value) -> Mode {
    let raw = match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(obj) => obj.get("mode").and_then(Value::as_str),
        _ => None,
    };
    raw.and_then(Mode::parse).unwrap_or(Mode::Auto)
}

fn as_timestamp(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

// ==============================================================================
// outbound
// ==============================================================================

pub fn encode_command(is_on: bool, now_ms: u64) -> Value {
    json!({ "isOn": is_on, "timestamp": now_ms })
}

/// mode is written as a bare string so firmware can read it with a string getter
pub fn encode_mode(mode: Mode) -> Value {
    Value::String(mode.as_str().to_string())
}

pub fn encode_current(reading: Reading) -> Value {
    json!({ "value": reading.value, "timestamp": reading.timestamp })
}

pub fn encode_series(points: &[SeriesPoint]) -> Value {
    serde_json::to_value(points).unwrap_or(Value::Array(Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: u64 = 60 * 60 * 1000;

    #[test]
    fn test_current_defaults_missing_fields() {
        let r = decode_current(&json!({}), 99).unwrap();
        assert_eq!(r, Reading { value: 0.0, timestamp: 99 });

        let r = decode_current(&json!({"value": 21.5}), 99).unwrap();
        assert_eq!(r, Reading { value: 21.5, timestamp: 99 });
    }

    #[test]
    fn test_current_rejects_non_object() {
        assert!(matches!(
            decode_current(&json!(12), 0),
            Err(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn test_series_filters_window_and_sorts() {
        let now = 24 * HOUR;
        let raw = json!({
            "-a": {"timestamp": now - HOUR, "value": 2.0},
            "-b": {"timestamp": now - 13 * HOUR, "value": 9.0},
            "-c": {"timestamp": now - 2 * HOUR, "value": 1.0},
            "-d": {"value": 5.0}
        });
        let points = decode_series(&raw, now, 12 * HOUR, 1440).unwrap();
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_series_keeps_newest_when_capped() {
        let raw = json!([
            {"timestamp": 3, "value": 3.0},
            {"timestamp": 1, "value": 1.0},
            {"timestamp": 2, "value": 2.0}
        ]);
        let points = decode_series(&raw, 10, 100, 2).unwrap();
        assert_eq!(points.iter().map(|p| p.timestamp).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_series_null_is_empty() {
        assert!(decode_series(&Value::Null, 10, 100, 10).unwrap().is_empty());
    }

    #[test]
    fn test_mode_accepts_string_and_legacy_object() {
        assert_eq!(decode_mode(&json!("manual")), Mode::Manual);
        assert_eq!(decode_mode(&json!({"mode": "manual"})), Mode::Manual);
        assert_eq!(decode_mode(&json!({"other": 1})), Mode::Auto);
        assert_eq!(decode_mode(&json!("bogus")), Mode::Auto);
    }

    #[test]
    fn test_actuator_state_defaults_off() {
        assert!(!decode_actuator_state(&json!({})).unwrap());
        assert!(decode_actuator_state(&json!({"isOn": true})).unwrap());
    }

    #[test]
    fn test_command_payload_shape() {
        assert_eq!(encode_command(true, 5), json!({"isOn": true, "timestamp": 5}));
        assert_eq!(encode_mode(Mode::Manual), json!("manual"));
    }
}
