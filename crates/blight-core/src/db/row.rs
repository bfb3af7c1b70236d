//! Row decoding and parameter binding helpers shared by the repositories.
//!
//! Structured fields cross the storage boundary here: typed value
//! objects are encoded to JSON text on the way in and decoded on the
//! way out, so no other layer sees stringified JSON.

use chrono::{DateTime, Utc};
use libsql::{Row, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Read a nullable TEXT column.
pub(super) fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(value) => Ok(Some(value)),
        other => Err(Error::InvalidInput(format!(
            "expected text in column {idx}, got {other:?}"
        ))),
    }
}

/// Read a nullable REAL column.
pub(super) fn opt_real(row: &Row, idx: i32) -> Result<Option<f64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Real(value) => Ok(Some(value)),
        Value::Integer(value) => Ok(Some(value as f64)),
        other => Err(Error::InvalidInput(format!(
            "expected real in column {idx}, got {other:?}"
        ))),
    }
}

/// Parse an RFC 3339 timestamp column value.
pub(super) fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| Error::InvalidInput(format!("invalid timestamp '{raw}': {error}")))
}

/// Read a nullable RFC 3339 timestamp column.
pub(super) fn opt_datetime(row: &Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    opt_text(row, idx)?
        .map(|raw| parse_datetime(&raw))
        .transpose()
}

/// Bind an optional string as TEXT or NULL.
pub(super) fn text_or_null(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.to_string()))
}

/// Bind an optional structured value as a JSON TEXT column or NULL.
pub(super) fn json_or_null<T: Serialize>(value: Option<&T>) -> Result<Value> {
    Ok(match value {
        Some(value) => Value::Text(serde_json::to_string(value)?),
        None => Value::Null,
    })
}

/// Decode an optional JSON TEXT column back into its typed form.
pub(super) fn decode_json_opt<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    raw.map(|raw| serde_json::from_str(&raw).map_err(Error::from))
        .transpose()
}
