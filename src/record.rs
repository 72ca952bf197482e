//! Record types flowing through an enrichment pipeline, plus the grouping-key
//! projection used at the shuffle boundary.
//!
//! Records are plain JSON objects ([`serde_json::Value`]). A record sitting in
//! the accumulator between ingest and dispatch is a [`PendingRecord`]: the
//! record itself, the sequence id the framework handed us, and an optional
//! precomputed shuffle key (set by stages that already know where a record
//! should be routed, e.g. the local pre-aggregation handoff).

use serde_json::{Map, Value};

/// Grouping-field sentinel meaning "fields unknown until runtime". Filtered
/// out before grouping fields are handed to a module's initialize hook.
pub const UNKNOWN_GROUPING_FIELD: &str = "?";

/// A record buffered in the accumulator until the next dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingRecord {
    /// Sequence id within the source split (or within the group, post-shuffle).
    pub seq: u64,
    /// The record payload, a JSON object.
    pub record: Value,
    /// Precomputed shuffle key, if a stage already assigned one.
    pub key: Option<Value>,
}

impl PendingRecord {
    /// Wrap a record with its sequence id and no precomputed key.
    pub fn new(seq: u64, record: Value) -> Self {
        Self {
            seq,
            record,
            key: None,
        }
    }

    /// Wrap a record that already carries its shuffle key.
    pub fn with_key(seq: u64, record: Value, key: Value) -> Self {
        Self {
            seq,
            record,
            key: Some(key),
        }
    }
}

/// Look up a (possibly dotted) property path inside a JSON object.
///
/// `"a.b"` resolves `{"a": {"b": 1}}` to `1`. Returns `None` if any path
/// component is absent or the intermediate value is not an object.
///
/// # Example
/// ```
/// use serde_json::json;
/// use enrichflow::record::json_property;
///
/// let obj = json!({"geo": {"city": "Oslo"}});
/// assert_eq!(json_property("geo.city", &obj), Some(&json!("Oslo")));
/// assert_eq!(json_property("geo.country", &obj), None);
/// ```
pub fn json_property<'a>(path: &str, object: &'a Value) -> Option<&'a Value> {
    let mut current = object;
    for component in path.split('.') {
        current = current.as_object()?.get(component)?;
    }
    Some(current)
}

/// Project a record's grouping fields into a composite shuffle key.
///
/// The key is a JSON object mapping each grouping field (the full path string,
/// dots included) to the value found in the record. Fields not present in the
/// record are silently omitted, so a record missing every field keys to `{}`.
///
/// # Example
/// ```
/// use serde_json::json;
/// use enrichflow::record::grouping_key;
///
/// let rec = json!({"a": 1, "b": 2, "c": 3});
/// let key = grouping_key(&["a".into(), "c".into()], &rec);
/// assert_eq!(key, json!({"a": 1, "c": 3}));
/// ```
pub fn grouping_key(fields: &[String], record: &Value) -> Value {
    let mut key = Map::new();
    for field in fields {
        if let Some(value) = json_property(field, record) {
            key.insert(field.clone(), value.clone());
        }
    }
    Value::Object(key)
}
