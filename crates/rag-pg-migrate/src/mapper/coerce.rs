//! Value coercions shared by the mappers.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Display names longer than this are cut.
pub const MAX_NAME_CHARS: usize = 1024;

/// Width of `status` in the document status table.
pub const MAX_STATUS_CHARS: usize = 64;

/// Width of `cache_type` in the LLM cache table.
pub const MAX_CACHE_TYPE_CHARS: usize = 32;

/// Width of reference columns (`track_id`, `full_doc_id`, `chunk_id`).
pub const MAX_REF_CHARS: usize = 255;

/// Convert epoch seconds to a UTC timestamp.
///
/// Anything that is not a finite, representable number yields `None`; an
/// absent timestamp is never replaced by the epoch.
pub fn epoch_to_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(secs) = n.as_i64() {
        return DateTime::from_timestamp(secs, 0);
    }
    let secs = n.as_f64()?;
    if !secs.is_finite() || secs.abs() > i64::MAX as f64 {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1_000_000_000.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

/// Truncate to at most `max` characters, on a `char` boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Text of a JSON value: strings unquoted, everything else as JSON.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Remove a field as text. Null and absent fields are `None`.
pub(crate) fn take_text(map: &mut Map<String, Value>, field: &str) -> Option<String> {
    match map.remove(field)? {
        Value::Null => None,
        other => Some(value_text(&other)),
    }
}

/// Remove a field as a 32-bit integer.
pub(crate) fn take_i32(map: &mut Map<String, Value>, field: &str) -> Option<i32> {
    let Value::Number(n) = map.remove(field)? else {
        return None;
    };
    match n.as_i64() {
        Some(i) => i32::try_from(i).ok(),
        None => n
            .as_f64()
            .filter(|f| f.is_finite() && *f >= i32::MIN as f64 && *f <= i32::MAX as f64)
            .map(|f| f as i32),
    }
}

/// Remove a field as a timestamp.
pub(crate) fn take_timestamp(map: &mut Map<String, Value>, field: &str) -> Option<DateTime<Utc>> {
    map.remove(field).as_ref().and_then(epoch_to_timestamp)
}

/// Shape problem found while taking a structured field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ShapeMismatch {
    pub field: &'static str,
    pub expected: &'static str,
}

impl ShapeMismatch {
    pub fn reason(&self) -> String {
        format!("field '{}' is not {}", self.field, self.expected)
    }
}

/// Remove a field that must be an array. Absent or null gives `[]`.
pub(crate) fn take_array(
    map: &mut Map<String, Value>,
    field: &'static str,
) -> (Value, Option<ShapeMismatch>) {
    match map.remove(field) {
        None | Some(Value::Null) => (Value::Array(Vec::new()), None),
        Some(v @ Value::Array(_)) => (v, None),
        Some(_) => (
            Value::Array(Vec::new()),
            Some(ShapeMismatch {
                field,
                expected: "an array",
            }),
        ),
    }
}

/// Remove a field that must be an object. Absent or null gives `{}`.
pub(crate) fn take_object(
    map: &mut Map<String, Value>,
    field: &'static str,
) -> (Map<String, Value>, Option<ShapeMismatch>) {
    match map.remove(field) {
        None | Some(Value::Null) => (Map::new(), None),
        Some(Value::Object(obj)) => (obj, None),
        Some(_) => (
            Map::new(),
            Some(ShapeMismatch {
                field,
                expected: "an object",
            }),
        ),
    }
}
