//! Event record construction
//!
//! Every unit of telemetry leaving the relay is an [`EventRecord`]: a JSON
//! object stamped with fixed metadata (event kind, source tag, protocol
//! version, timestamps) merged over kind-specific payload fields.
//!
//! Building a record is pure apart from reading the clock; records are
//! immutable once built and serialize to exactly one UTF-8 JSON text frame.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Fixed source tag stamped into every record
pub const SOURCE_TAG: &str = "org.inkstream.writing-telemetry";

/// Protocol version stamped into every record
pub const PROTOCOL_VERSION: &str = "alpha";

/// Records built inside the relay itself carry this origin marker;
/// forwarded page-script events carry `client-page` instead.
pub const ORIGIN_RELAY: &str = "relay";

/// A single structured, timestamped unit of telemetry
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct EventRecord {
    fields: Map<String, Value>,
}

impl EventRecord {
    /// Stamp a payload with fixed metadata, producing a finished record.
    ///
    /// Adds `event`, `source`, `version`, `ts` (epoch millis), `human_ts`,
    /// and `iso_ts` on top of the payload fields. An `origin` already set
    /// by the producer is preserved; otherwise it defaults to [`ORIGIN_RELAY`].
    ///
    /// The builder trusts its callers: payload fields are merged as-is,
    /// with no validation beyond being a JSON object.
    pub fn build(kind: &str, payload: Map<String, Value>) -> Self {
        let now = Utc::now();
        let mut fields = payload;
        fields.insert("event".to_string(), Value::from(kind));
        fields.insert("source".to_string(), Value::from(SOURCE_TAG));
        fields.insert("version".to_string(), Value::from(PROTOCOL_VERSION));
        fields.insert("ts".to_string(), Value::from(now.timestamp_millis()));
        fields.insert("human_ts".to_string(), Value::from(now.to_rfc2822()));
        fields.insert(
            "iso_ts".to_string(),
            Value::from(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        fields
            .entry("origin".to_string())
            .or_insert_with(|| Value::from(ORIGIN_RELAY));
        Self { fields }
    }

    /// Build a record with an empty payload (marker events)
    pub fn marker(kind: &str) -> Self {
        Self::build(kind, Map::new())
    }

    /// The event kind this record was built with
    pub fn kind(&self) -> &str {
        self.fields
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Look up a field by name
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Serialize to the wire form: one UTF-8 JSON text frame
    pub fn to_frame(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}

/// Coerce a producer-supplied JSON value into an object payload.
///
/// Producers normally hand over objects; anything else is wrapped under a
/// `value` key rather than rejected.
pub fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
