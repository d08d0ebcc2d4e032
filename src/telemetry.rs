//! Typed telemetry model
//!
//! Every reading is a [`TelemetryEntry`]: a key, a millisecond timestamp and
//! exactly one typed value. Entries are immutable once built and are moved
//! along with the message that carries them.
//!
//! ## Payload parsing
//!
//! Raw device payloads are flat JSON objects. Each top-level field becomes
//! one entry, except the reserved fields [`RESERVED_FIELDS`]:
//!
//! ```text
//! {"timestamp":1000,"temperature":21.5,"online":true,"nested":{"a":1}}
//!     → temperature: Double(21.5) @1000
//!     → online:      Bool(true)   @1000
//!     → nested:      Json("{\"a\":1}") @1000
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::trace;

/// Payload fields that carry envelope information, not telemetry
pub const RESERVED_FIELDS: [&str; 4] = ["timestamp", "deviceId", "deviceName", "sendTimeNanos"];

/// Field holding an explicit sample timestamp (epoch millis)
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Kind of value stored in an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Long,
    Double,
    Boolean,
    String,
    Json,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Long => "LONG",
            DataType::Double => "DOUBLE",
            DataType::Boolean => "BOOLEAN",
            DataType::String => "STRING",
            DataType::Json => "JSON",
        };
        f.write_str(name)
    }
}

/// A single typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelemetryValue {
    Long(i64),
    Double(f64),
    Bool(bool),
    String(String),
    /// Serialized JSON object or array
    Json(String),
}

impl TelemetryValue {
    pub fn data_type(&self) -> DataType {
        match self {
            TelemetryValue::Long(_) => DataType::Long,
            TelemetryValue::Double(_) => DataType::Double,
            TelemetryValue::Bool(_) => DataType::Boolean,
            TelemetryValue::String(_) => DataType::String,
            TelemetryValue::Json(_) => DataType::Json,
        }
    }

    /// Numeric view of the value; only longs and doubles have one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TelemetryValue::Long(v) => Some(*v as f64),
            TelemetryValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of the value; only string entries have one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TelemetryValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryValue::Long(v) => write!(f, "{v}"),
            TelemetryValue::Double(v) => write!(f, "{v}"),
            TelemetryValue::Bool(v) => write!(f, "{v}"),
            TelemetryValue::String(v) | TelemetryValue::Json(v) => f.write_str(v),
        }
    }
}

/// One timestamped key/value reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEntry {
    key: String,
    ts: i64,
    value: TelemetryValue,
}

impl TelemetryEntry {
    pub fn new(key: impl Into<String>, ts: i64, value: TelemetryValue) -> Self {
        Self {
            key: key.into(),
            ts,
            value,
        }
    }

    pub fn long(key: impl Into<String>, ts: i64, value: i64) -> Self {
        Self::new(key, ts, TelemetryValue::Long(value))
    }

    pub fn double(key: impl Into<String>, ts: i64, value: f64) -> Self {
        Self::new(key, ts, TelemetryValue::Double(value))
    }

    pub fn boolean(key: impl Into<String>, ts: i64, value: bool) -> Self {
        Self::new(key, ts, TelemetryValue::Bool(value))
    }

    pub fn string(key: impl Into<String>, ts: i64, value: impl Into<String>) -> Self {
        Self::new(key, ts, TelemetryValue::String(value.into()))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn value(&self) -> &TelemetryValue {
        &self.value
    }

    pub fn data_type(&self) -> DataType {
        self.value.data_type()
    }
}

/// Why a raw payload could not be turned into entries
#[derive(Debug, thiserror::Error)]
pub enum TelemetryParseError {
    #[error("malformed telemetry JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("telemetry payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("invalid timestamp field: {0}")]
    InvalidTimestamp(String),
}

/// Parse a raw JSON payload into typed entries.
///
/// All entries share the payload's `timestamp` field when present, otherwise
/// `arrival_ts`. `null` fields are dropped.
pub fn parse_telemetry_payload(
    payload: &str,
    arrival_ts: i64,
) -> Result<Vec<TelemetryEntry>, TelemetryParseError> {
    let value: Value = serde_json::from_str(payload)?;

    let Value::Object(object) = value else {
        return Err(TelemetryParseError::NotAnObject(json_kind(&value)));
    };

    let ts = payload_timestamp(&object)?.unwrap_or(arrival_ts);

    let entries: Vec<TelemetryEntry> = object
        .into_iter()
        .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
        .filter_map(|(key, value)| to_value(value).map(|value| TelemetryEntry::new(key, ts, value)))
        .collect();

    trace!("parsed {} telemetry entries at ts {ts}", entries.len());

    Ok(entries)
}

fn payload_timestamp(object: &Map<String, Value>) -> Result<Option<i64>, TelemetryParseError> {
    match object.get(TIMESTAMP_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number_to_millis(number)
            .map(Some)
            .ok_or_else(|| TelemetryParseError::InvalidTimestamp(number.to_string())),
        Some(Value::String(text)) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| TelemetryParseError::InvalidTimestamp(text.clone())),
        Some(other) => Err(TelemetryParseError::InvalidTimestamp(other.to_string())),
    }
}

fn number_to_millis(number: &Number) -> Option<i64> {
    if let Some(ts) = number.as_i64() {
        return Some(ts);
    }

    number
        .as_f64()
        .filter(|ts| ts.is_finite() && *ts >= i64::MIN as f64 && *ts <= i64::MAX as f64)
        .map(|ts| ts.trunc() as i64)
}

fn to_value(value: Value) -> Option<TelemetryValue> {
    match value {
        Value::Null => None,
        Value::Bool(v) => Some(TelemetryValue::Bool(v)),
        Value::String(v) => Some(TelemetryValue::String(v)),
        Value::Number(number) => Some(number_to_value(&number)),
        nested @ (Value::Object(_) | Value::Array(_)) => Some(TelemetryValue::Json(nested.to_string())),
    }
}

fn number_to_value(number: &Number) -> TelemetryValue {
    if let Some(v) = number.as_i64() {
        return TelemetryValue::Long(v);
    }

    // u64 above i64::MAX or a float
    let v = number.as_f64().unwrap_or(f64::NAN);
    let integral = v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64;
    if integral {
        TelemetryValue::Long(v as i64)
    } else {
        TelemetryValue::Double(v)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
