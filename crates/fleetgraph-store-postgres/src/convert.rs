// crates/fleetgraph-store-postgres/src/convert.rs
// ============================================================================
// Module: Conversion helpers
// Description: Scalar/JSON (de)serialization shared by every row mapper.
// ============================================================================

use fleetgraph_core::clock::Timestamp;
use fleetgraph_core::interfaces::StoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serializes `value` to a JSON document, for columns holding a compound
/// value (a set, a list, a tagged enum, an opaque `work_spec` payload).
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Backend(err.to_string()))
}

/// Parses a JSON document column back into `T`.
pub(crate) fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|err| StoreError::Backend(err.to_string()))
}

/// Serializes a plain-string-encoded value (a unit enum, a [`Timestamp`]) to
/// its bare text form, without the surrounding JSON quotes a generic
/// `to_json` would leave in place. Every enum in the data model is a unit
/// enum with `#[serde(rename_all = "snake_case")]`, so this always succeeds
/// for the types this store actually stores.
pub(crate) fn scalar_text<T: Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value).map_err(|err| StoreError::Backend(err.to_string()))? {
        serde_json::Value::String(text) => Ok(text),
        other => Err(StoreError::Backend(format!(
            "expected a scalar string encoding, got {other}"
        ))),
    }
}

/// Parses a bare text column back into a scalar-encoded `T`.
pub(crate) fn scalar_from_text<T: DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|err| StoreError::Backend(err.to_string()))
}

/// Serializes a [`Timestamp`] to its RFC 3339 text form.
pub(crate) fn timestamp_text(timestamp: Timestamp) -> Result<String, StoreError> {
    scalar_text(&timestamp)
}

/// Parses an RFC 3339 text column back into a [`Timestamp`].
pub(crate) fn timestamp_from_text(text: &str) -> Result<Timestamp, StoreError> {
    scalar_from_text(text)
}

/// Serializes an optional [`Timestamp`] to an optional RFC 3339 text column.
pub(crate) fn opt_timestamp_text(timestamp: Option<Timestamp>) -> Result<Option<String>, StoreError> {
    timestamp.map(timestamp_text).transpose()
}

/// Parses an optional RFC 3339 text column back into an optional [`Timestamp`].
pub(crate) fn opt_timestamp_from_text(text: Option<String>) -> Result<Option<Timestamp>, StoreError> {
    text.as_deref().map(timestamp_from_text).transpose()
}
