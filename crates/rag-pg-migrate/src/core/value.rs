//! SQL values produced by the record mappers.
//!
//! Values travel to PostgreSQL as text parameters; the statement casts each
//! placeholder to its column type (`$1::text::jsonb`), so the driver never has
//! to agree with the server on a binary encoding for `agtype` or `graphid`.

use chrono::{DateTime, SecondsFormat, Utc};

use super::graphid::GraphId;

/// One column value of a target row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// 32-bit signed integer (int4).
    I32(i32),

    /// 64-bit signed integer (int8).
    I64(i64),

    /// Text.
    Text(String),

    /// JSON document (jsonb or agtype column).
    Json(serde_json::Value),

    /// Point in time, UTC.
    Timestamp(DateTime<Utc>),

    /// Packed AGE identifier.
    GraphId(GraphId),
}

impl SqlValue {
    /// Text value, or NULL when absent.
    pub fn opt_text(value: Option<String>) -> Self {
        value.map(SqlValue::Text).unwrap_or(SqlValue::Null)
    }

    /// Timestamp value, or NULL when absent.
    pub fn opt_timestamp(value: Option<DateTime<Utc>>) -> Self {
        value.map(SqlValue::Timestamp).unwrap_or(SqlValue::Null)
    }

    /// JSON value, or NULL when absent.
    pub fn opt_json(value: Option<serde_json::Value>) -> Self {
        value.map(SqlValue::Json).unwrap_or(SqlValue::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render as a text parameter (`None` for NULL).
    pub fn to_param(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::I32(n) => Some(n.to_string()),
            SqlValue::I64(n) => Some(n.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Json(v) => Some(v.to_string()),
            SqlValue::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
            SqlValue::GraphId(id) => Some(id.to_string()),
        }
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<i32> for SqlValue {
    fn from(n: i32) -> Self {
        SqlValue::I32(n)
    }
}

impl From<GraphId> for SqlValue {
    fn from(id: GraphId) -> Self {
        SqlValue::GraphId(id)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

/// A row as an ordered list of column values.
pub type Row = Vec<SqlValue>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_to_param_renders_text() {
        assert_eq!(SqlValue::Null.to_param(), None);
        assert_eq!(SqlValue::I32(42).to_param().as_deref(), Some("42"));
        assert_eq!(SqlValue::from("abc").to_param().as_deref(), Some("abc"));
        assert_eq!(
            SqlValue::Json(json!({"a": [1, 2]})).to_param().as_deref(),
            Some("{\"a\":[1,2]}")
        );
    }

    #[test]
    fn test_timestamp_param_is_rfc3339_utc() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(
            SqlValue::Timestamp(ts).to_param().as_deref(),
            Some("2023-11-14T22:13:20Z")
        );
    }

    #[test]
    fn test_optional_constructors() {
        assert!(SqlValue::opt_text(None).is_null());
        assert!(SqlValue::opt_timestamp(None).is_null());
        assert_eq!(SqlValue::opt_text(Some("x".into())), SqlValue::Text("x".into()));
    }
}
