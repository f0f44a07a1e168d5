//! JSON records exchanged through the broker.

use crate::error::{Error, Result};
use chrono::DateTime;
use sensa_wire::{Snapshot, UserData};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};
use std::path::PathBuf;

/// Fan-out notice that a raw snapshot blob is ready
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSnapshotRecord {
    pub user_id: u64,
    /// Path of the serialized snapshot blob
    pub address: PathBuf,
}

impl RawSnapshotRecord {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// One parser's projection of a snapshot, published under `topic`
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResult {
    pub topic: String,
    pub fields: Map<String, Value>,
}

impl ParsedResult {
    /// Start a result tagged with the snapshot id and owner.
    pub fn new(topic: impl Into<String>, snapshot_id: u64, user_id: u64) -> Self {
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::from(snapshot_id));
        fields.insert("user_id".to_string(), Value::from(user_id));
        Self {
            topic: topic.into(),
            fields,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn snapshot_id(&self) -> Option<u64> {
        self.fields.get("id").and_then(Value::as_u64)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.fields)?)
    }
}

/// JSON number for an `f32`, taken from its shortest decimal form so that
/// `0.3f32` publishes as `0.3` rather than its widened `f64` value.
/// Non-finite values become `null`.
pub fn float_value(value: f32) -> Value {
    value
        .to_string()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

/// Projection published on the "users" topic.
pub fn user_projection(user: &UserData) -> Value {
    json!({
        "user_id": user.user_id,
        "username": user.username,
        "birthday": format_birthday(user.birthday),
        "gender": user.gender().as_str(),
    })
}

/// Metadata published on the "snapshots" topic.
pub fn snapshot_metadata(user_id: u64, snapshot: &Snapshot) -> Value {
    json!({
        "id": snapshot.id(),
        "user_id": user_id,
        "datetime": format_capture_time(snapshot.datetime),
    })
}

/// `"August 30, 1992"`
pub fn format_birthday(seconds: u32) -> String {
    DateTime::from_timestamp(i64::from(seconds), 0)
        .map(|t| t.format("%B %-d, %Y").to_string())
        .unwrap_or_else(|| seconds.to_string())
}

/// `"December 4, 2019 at 08:08:07.339"`
pub fn format_capture_time(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.format("%B %-d, %Y at %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Sortable directory name for a capture, `"2019-12-04_08-08-07-339"`
pub fn sortable_timestamp(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d_%H-%M-%S-%3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Parse a JSON object from raw bytes.
pub fn parse_object(bytes: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice(bytes)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Persistence(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensa_wire::Gender;

    #[test]
    fn test_user_projection() {
        let user = UserData::new(123, "Test Testenson", 1000, Gender::Other);
        let value = user_projection(&user);
        assert_eq!(value["user_id"], 123);
        assert_eq!(value["username"], "Test Testenson");
        assert_eq!(value["birthday"], "January 1, 1970");
        assert_eq!(value["gender"], "other");
    }

    #[test]
    fn test_snapshot_metadata() {
        let value = snapshot_metadata(42, &Snapshot::at(1_575_446_887_339));
        assert_eq!(value["id"], 1_575_446_887_339u64);
        assert_eq!(value["user_id"], 42);
        assert_eq!(value["datetime"], "December 4, 2019 at 08:08:07.339");
    }

    #[test]
    fn test_sortable_timestamp() {
        assert_eq!(
            sortable_timestamp(1_575_446_887_339),
            "2019-12-04_08-08-07-339"
        );
        assert!(sortable_timestamp(1_000) < sortable_timestamp(2_000));
    }

    #[test]
    fn test_parsed_result_tags() {
        let result = ParsedResult::new("pose", 77, 9).with("width", 4);
        assert_eq!(result.snapshot_id(), Some(77));
        assert_eq!(result.fields["user_id"], 9);
        assert_eq!(result.fields["width"], 4);
    }

    #[test]
    fn test_float_value_keeps_short_form() {
        assert_eq!(float_value(0.3), json!(0.3));
        assert_eq!(float_value(0.2), json!(0.2));
        assert_eq!(float_value(1.0), json!(1.0));
        assert_eq!(serde_json::to_string(&float_value(0.3)).unwrap(), "0.3");
        assert_eq!(float_value(f32::NAN), Value::Null);
    }

    #[test]
    fn test_parse_object_rejects_arrays() {
        assert!(parse_object(b"{\"id\": 1}").is_ok());
        assert!(matches!(parse_object(b"[1, 2]"), Err(Error::Persistence(_))));
        assert!(matches!(parse_object(b"{not json"), Err(Error::Json(_))));
    }
}
