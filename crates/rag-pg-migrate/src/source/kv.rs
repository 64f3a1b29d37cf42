//! Key-value store files: one JSON object mapping keys to records.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use super::{RecordBody, SourceRecord};
use crate::error::{MigrateError, Result};

/// Fields that mark an object as a cache entry rather than a mode bucket.
const CACHE_ENTRY_FIELDS: [&str; 4] = ["return", "return_value", "original_prompt", "cache_type"];

/// Read a key-value store file.
pub fn read_kv_file(path: &Path) -> Result<Vec<SourceRecord>> {
    let content = std::fs::read_to_string(path)?;
    let records = parse_kv(path, &content)?;
    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Parse key-value store content. `path` is only used in error messages.
pub fn parse_kv(path: &Path, content: &str) -> Result<Vec<SourceRecord>> {
    let value: Value = serde_json::from_str(content).map_err(|e| {
        MigrateError::source_format(
            path,
            format!("line {} column {}", e.line(), e.column()),
            e.to_string(),
        )
    })?;

    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, body)| SourceRecord::new(key, body))
            .collect()),
        other => Err(MigrateError::source_format(
            path,
            "line 1 column 1",
            format!("expected a JSON object at top level, found {}", json_kind(&other)),
        )),
    }
}

/// Flatten legacy cache files grouped by mode.
///
/// Older cache exports nest entries one level deeper:
/// `{"default": {"<hash>": {...}}}`. Each such bucket is replaced by its
/// entries, keyed `"<mode>:<hash>"`. Entries already at the top level pass
/// through unchanged.
pub fn flatten_cache_buckets(records: Vec<SourceRecord>) -> Vec<SourceRecord> {
    let mut flat = Vec::with_capacity(records.len());
    for record in records {
        match record.body {
            RecordBody::Object(map) if is_mode_bucket(&map) => {
                debug!("Flattening legacy cache bucket '{}' ({} entries)", record.key, map.len());
                for (hash, entry) in map {
                    flat.push(SourceRecord::new(format!("{}:{}", record.key, hash), entry));
                }
            }
            body => flat.push(SourceRecord {
                key: record.key,
                body,
            }),
        }
    }
    flat
}

fn is_mode_bucket(map: &serde_json::Map<String, Value>) -> bool {
    !map.is_empty()
        && !CACHE_ENTRY_FIELDS.iter().any(|f| map.contains_key(*f))
        && map.values().all(|v| {
            v.as_object()
                .is_some_and(|entry| CACHE_ENTRY_FIELDS.iter().any(|f| entry.contains_key(*f)))
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
    use std::io::Write;

    fn p() -> &'static Path {
        Path::new("kv_store_full_docs.json")
    }

    #[test]
    fn test_parse_keeps_file_order() {
        let records = parse_kv(p(), r#"{"z": {"content": "1"}, "a": {"content": "2"}, "m": {}}"#).unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_non_object_values_are_malformed() {
        let records = parse_kv(p(), r#"{"a": "plain text", "b": {"content": "x"}}"#).unwrap();
        assert_eq!(records[0].body, RecordBody::Malformed(json!("plain text")));
        assert!(matches!(records[1].body, RecordBody::Object(_)));
    }

    #[test]
    fn test_malformed_json_reports_line_and_column() {
        let err = parse_kv(p(), "{\n  \"a\": {\"content\": \"x\"},\n  \"b\": }\n").unwrap_err();
        match err {
            MigrateError::SourceFormat { position, .. } => assert!(position.starts_with("line 3 column")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_top_level_array_is_rejected() {
        let err = parse_kv(p(), "[1, 2]").unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_read_kv_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"doc-1": {{"content": "hello"}}}}"#).unwrap();
        let records = read_kv_file(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "doc-1");
    }

    #[test]
    fn test_flatten_legacy_cache_buckets() {
        let records = parse_kv(
            p(),
            r#"{
                "default": {"h1": {"return": "a"}, "h2": {"return": "b"}},
                "local:h3": {"return": "c", "cache_type": "query"}
            }"#,
        )
        .unwrap();
        let flat = flatten_cache_buckets(records);
        let keys: Vec<&str> = flat.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["default:h1", "default:h2", "local:h3"]);
    }

    #[test]
    fn test_flatten_leaves_current_layout_alone() {
        let records = parse_kv(p(), r#"{"k": {"return": "x"}, "bad": 3}"#).unwrap();
        assert_eq!(flatten_cache_buckets(records.clone()), records);
    }
}
