//! JSON envelopes returned by the query endpoints

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::Error;

/// `GET /api/units` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitsEnvelope {
    /// Always `true` for a served envelope
    pub ok: bool,
    /// Whether this response came out of the cache
    pub from_cache: bool,
    /// Seconds this envelope stays fresh in the cache
    pub cache_ttl: u64,
    /// Record count reported by the query endpoint
    pub total_size: u64,
    /// Unit records, each with `Unit_Type_Label` added
    pub records: Vec<Value>,
}

/// `GET /api/units/describe` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeEnvelope {
    /// Always `true` for a served envelope
    pub ok: bool,
    /// Whether this response came out of the cache
    pub from_cache: bool,
    /// Seconds this envelope stays fresh in the cache
    pub cache_ttl: u64,
    /// Field metadata, in describe order
    pub fields: Vec<FieldSummary>,
}

/// Reduced field metadata from a describe call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSummary {
    /// API name
    pub name: String,
    /// Display label
    pub label: String,
    /// Field data type
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Copy of `envelope` as it should be stored: `fromCache` forced to `true`
#[must_use]
pub fn mark_cached(envelope: &Value) -> Value {
    let mut cached = envelope.clone();
    if let Value::Object(map) = &mut cached {
        map.insert("fromCache".to_string(), Value::Bool(true));
    }
    cached
}

/// `{ok: false, status, error}` for a failure with no cached fallback
#[must_use]
pub fn error_envelope(error: &Error) -> Value {
    json!({
        "ok": false,
        "status": error.http_status().as_u16(),
        "error": error.envelope_message(),
    })
}
