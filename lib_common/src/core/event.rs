//! # Event Normalizer
//!
//! Upstream frames are JSON objects carrying two reserved keys:
//!
//! - `_EVENT`: the event type name (mandatory, non-empty string).
//! - `_BLOCKTIME`: the block timestamp in Unix seconds (optional).
//!
//! Everything else is payload. [`normalize`] strips the reserved keys, derives
//! the ISO-8601 timestamp and hands back an [`EventRecord`]. The record is
//! built once per upstream message and then shared read-only (behind an `Arc`)
//! by the analytics sink, the reset handler and every fan-out connection.

use chrono::DateTime;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::RelayError;

/// The raw mapping as decoded from one upstream frame.
pub type RawMessage = Map<String, Value>;

/// Reserved key holding the event type.
pub const EVENT_KEY: &str = "_EVENT";
/// Reserved key holding the block time.
pub const BLOCKTIME_KEY: &str = "_BLOCKTIME";

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// # Event Record
///
/// The canonical unit circulated inside the process.
///
/// Serialized with the field names web clients already consume
/// (`event`, `block_time`, `block_time_str`, `msg`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    /// Event type name. Never empty.
    #[serde(rename = "event")]
    pub event_type: String,
    /// Block time in Unix seconds, absent for events not tied to a block.
    pub block_time: Option<i64>,
    /// UTC ISO-8601 rendering of `block_time` with microseconds, or `""`.
    #[serde(rename = "block_time_str")]
    pub block_time_iso: String,
    /// All upstream fields except the reserved ones.
    #[serde(rename = "msg")]
    pub payload: Map<String, Value>,
}

impl EventRecord {
    /// Whether this record is the upstream "database re-initialized" signal.
    pub fn is_reset_signal(&self) -> bool {
        self.event_type == crate::sinks::reset::RESET_EVENT
    }

    /// The record in its wire form, as a JSON mapping.
    pub fn to_mapping(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // A struct always serializes to an object.
            _ => Map::new(),
        }
    }
}

/// Decodes one upstream frame into a [`RawMessage`].
///
/// Anything that is not a JSON object is rejected as malformed.
pub fn parse_frame(frame: &[u8]) -> Result<RawMessage, RelayError> {
    let value: Value = serde_json::from_slice(frame)
        .map_err(|e| RelayError::MalformedMessage(format!("invalid JSON: {}", e)))?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(RelayError::MalformedMessage(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Converts a raw upstream mapping into an [`EventRecord`].
///
/// Fails with [`RelayError::MalformedMessage`] when `_EVENT` is missing, empty
/// or not a string, or when `_BLOCKTIME` is neither an integer nor `null`.
pub fn normalize(mut raw: RawMessage) -> Result<EventRecord, RelayError> {
    let event_type = match raw.remove(EVENT_KEY) {
        Some(Value::String(name)) if !name.is_empty() => name,
        Some(Value::String(_)) => {
            return Err(RelayError::MalformedMessage(format!("{} is empty", EVENT_KEY)))
        }
        Some(other) => {
            return Err(RelayError::MalformedMessage(format!(
                "{} must be a string, got {}",
                EVENT_KEY,
                json_kind(&other)
            )))
        }
        None => return Err(RelayError::MalformedMessage(format!("{} is missing", EVENT_KEY))),
    };

    let block_time = match raw.remove(BLOCKTIME_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(secs) => Some(secs),
            None => {
                return Err(RelayError::MalformedMessage(format!(
                    "{} must be an integer, got {}",
                    BLOCKTIME_KEY, n
                )))
            }
        },
        Some(other) => {
            return Err(RelayError::MalformedMessage(format!(
                "{} must be an integer, got {}",
                BLOCKTIME_KEY,
                json_kind(&other)
            )))
        }
    };

    let block_time_iso = match block_time {
        Some(secs) => format_block_time(secs)?,
        None => String::new(),
    };

    Ok(EventRecord {
        event_type,
        block_time,
        block_time_iso,
        payload: raw,
    })
}

/// Renders Unix seconds as `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
pub fn format_block_time(secs: i64) -> Result<String, RelayError> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format(ISO_FORMAT).to_string())
        .ok_or_else(|| {
            RelayError::MalformedMessage(format!("{} {} is out of range", BLOCKTIME_KEY, secs))
        })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawMessage {
        match value {
            Value::Object(map) => map,
            _ => panic!("test input must be an object"),
        }
    }

    #[test]
    fn test_normalize_with_block_time() {
        let record = normalize(raw(json!({
            "_EVENT": "credit",
            "_BLOCKTIME": 1700000000,
            "asset": "XYZ",
            "quantity": 100
        })))
        .unwrap();

        assert_eq!(record.event_type, "credit");
        assert_eq!(record.block_time, Some(1700000000));
        assert_eq!(record.block_time_iso, "2023-11-14T22:13:20.000000Z");
        assert_eq!(record.payload.len(), 2);
        assert_eq!(record.payload["asset"], json!("XYZ"));
        assert_eq!(record.payload["quantity"], json!(100));
    }

    #[test]
    fn test_normalize_without_block_time_has_empty_iso() {
        let record = normalize(raw(json!({"_EVENT": "balance", "address": "abc"}))).unwrap();
        assert_eq!(record.block_time, None);
        assert!(record.block_time_iso.is_empty());
        assert_eq!(record.payload.keys().collect::<Vec<_>>(), vec!["address"]);
    }

    #[test]
    fn test_null_block_time_is_absent() {
        let record = normalize(raw(json!({"_EVENT": "balance", "_BLOCKTIME": null}))).unwrap();
        assert_eq!(record.block_time, None);
        assert_eq!(record.block_time_iso, "");
        assert!(record.payload.is_empty());
    }

    #[test]
    fn test_iso_present_iff_block_time_present() {
        let inputs = [
            json!({"_EVENT": "a"}),
            json!({"_EVENT": "b", "_BLOCKTIME": 0}),
            json!({"_EVENT": "c", "_BLOCKTIME": 1231006505, "x": 1}),
            json!({"_EVENT": "d", "_BLOCKTIME": null, "y": [1, 2]}),
        ];
        for input in inputs {
            let record = normalize(raw(input)).unwrap();
            assert_eq!(record.block_time.is_some(), !record.block_time_iso.is_empty());
            assert!(!record.payload.contains_key(EVENT_KEY));
            assert!(!record.payload.contains_key(BLOCKTIME_KEY));
        }
    }

    #[test]
    fn test_epoch_zero_is_a_real_block_time() {
        let record = normalize(raw(json!({"_EVENT": "genesis", "_BLOCKTIME": 0}))).unwrap();
        assert_eq!(record.block_time_iso, "1970-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_missing_event_is_malformed() {
        let err = normalize(raw(json!({"_BLOCKTIME": 1, "asset": "XYZ"}))).unwrap_err();
        assert!(matches!(err, RelayError::MalformedMessage(_)));
    }

    #[test]
    fn test_bad_event_and_block_time_types_are_malformed() {
        for input in [
            json!({"_EVENT": ""}),
            json!({"_EVENT": 7}),
            json!({"_EVENT": "credit", "_BLOCKTIME": "1700000000"}),
            json!({"_EVENT": "credit", "_BLOCKTIME": 1.5}),
            json!({"_EVENT": "credit", "_BLOCKTIME": i64::MAX}),
        ] {
            assert!(matches!(normalize(raw(input)), Err(RelayError::MalformedMessage(_))));
        }
    }

    #[test]
    fn test_parse_frame_rejects_non_objects() {
        assert!(parse_frame(br#"{"_EVENT":"credit"}"#).is_ok());
        assert!(matches!(parse_frame(b"[1,2,3]"), Err(RelayError::MalformedMessage(_))));
        assert!(matches!(parse_frame(b"not json"), Err(RelayError::MalformedMessage(_))));
    }

    #[test]
    fn test_wire_form_matches_mapping() {
        let record = normalize(raw(json!({"_EVENT": "credit", "_BLOCKTIME": 1700000000, "asset": "XYZ"}))).unwrap();
        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(wire, Value::Object(record.to_mapping()));
        assert_eq!(wire["event"], json!("credit"));
        assert_eq!(wire["block_time_str"], json!("2023-11-14T22:13:20.000000Z"));
        assert_eq!(wire["msg"]["asset"], json!("XYZ"));
    }

    #[test]
    fn test_mapping_has_exactly_the_wire_keys() {
        let record = normalize(raw(json!({"_EVENT": "balance", "address": "abc"}))).unwrap();
        let mapping = record.to_mapping();
        let mut keys: Vec<&str> = mapping.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["block_time", "block_time_str", "event", "msg"]);
        assert_eq!(mapping["block_time"], Value::Null);
        assert_eq!(mapping["block_time_str"], json!(""));
    }

    #[test]
    fn test_reset_signal_detection() {
        assert!(normalize(raw(json!({"_EVENT": "new_db_init"}))).unwrap().is_reset_signal());
        assert!(!normalize(raw(json!({"_EVENT": "credit"}))).unwrap().is_reset_signal());
    }
}
