//! Key-value records to relational rows.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::coerce::{
    take_array, take_i32, take_object, take_text, take_timestamp, value_text, ShapeMismatch,
    MAX_CACHE_TYPE_CHARS, MAX_NAME_CHARS, MAX_REF_CHARS, MAX_STATUS_CHARS,
};
use super::{MappingLog, TargetRow};
use crate::core::{Row, SqlValue};
use crate::source::{RecordBody, SourceRecord};

/// Status given to documents that carry none.
pub const DEFAULT_STATUS: &str = "pending";

/// Cache type given to entries that carry none.
pub const DEFAULT_CACHE_TYPE: &str = "extract";

/// Split a record into its object body, logging malformed ones.
///
/// A malformed body yields an empty map plus the raw value's text.
fn open_record(record: SourceRecord, log: &mut MappingLog) -> (String, Map<String, Value>, Option<String>) {
    match record.body {
        RecordBody::Object(map) => (record.key, map, None),
        RecordBody::Malformed(raw) => {
            log.coerced(&record.key, "record is not a JSON object");
            let text = value_text(&raw);
            (record.key, Map::new(), Some(text))
        }
    }
}

fn note_shape(log: &mut MappingLog, key: &str, mismatch: Option<ShapeMismatch>) {
    if let Some(m) = mismatch {
        log.coerced(key, m.reason());
    }
}

/// Row of `LIGHTRAG_DOC_FULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRow {
    pub workspace: String,
    pub id: String,
    pub doc_name: String,
    pub content: Option<String>,
    pub meta: Map<String, Value>,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

impl TargetRow for DocumentRow {
    fn into_values(self) -> Row {
        vec![
            self.workspace.into(),
            self.id.into(),
            self.doc_name.into(),
            SqlValue::opt_text(self.content),
            SqlValue::Json(Value::Object(self.meta)),
            SqlValue::opt_timestamp(self.create_time),
            SqlValue::opt_timestamp(self.update_time),
        ]
    }
}

/// Map a full-document record.
///
/// The display name is `doc_name`, else `file_path`, else the key. Fields
/// not consumed here end up in `meta`.
pub fn map_document(workspace: &str, record: SourceRecord, log: &mut MappingLog) -> DocumentRow {
    let (key, mut map, raw) = open_record(record, log);

    let content = raw.or_else(|| take_text(&mut map, "content"));
    let name = take_text(&mut map, "doc_name")
        .or_else(|| map.get("file_path").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| key.clone());
    let doc_name = log.fit_width(&key, "doc_name", name, MAX_NAME_CHARS);
    let create_time = take_timestamp(&mut map, "create_time");
    let update_time = take_timestamp(&mut map, "update_time");

    DocumentRow {
        workspace: workspace.to_string(),
        doc_name,
        id: key,
        content,
        meta: map,
        create_time,
        update_time,
    }
}

/// Row of `LIGHTRAG_DOC_STATUS`.
#[derive(Debug, Clone, PartialEq)]
pub struct DocStatusRow {
    pub workspace: String,
    pub id: String,
    pub content_summary: Option<String>,
    pub content_length: i32,
    pub chunks_count: i32,
    pub status: String,
    pub file_path: Option<String>,
    pub chunks_list: Value,
    pub track_id: Option<String>,
    pub metadata: Map<String, Value>,
    pub error_msg: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TargetRow for DocStatusRow {
    fn into_values(self) -> Row {
        vec![
            self.workspace.into(),
            self.id.into(),
            SqlValue::opt_text(self.content_summary),
            self.content_length.into(),
            self.chunks_count.into(),
            self.status.into(),
            SqlValue::opt_text(self.file_path),
            SqlValue::Json(self.chunks_list),
            SqlValue::opt_text(self.track_id),
            SqlValue::Json(Value::Object(self.metadata)),
            SqlValue::opt_text(self.error_msg),
            SqlValue::opt_timestamp(self.created_at),
            SqlValue::opt_timestamp(self.updated_at),
        ]
    }
}

/// Map a document status record.
///
/// Unconsumed fields are merged into `metadata` without overriding keys the
/// record's own `metadata` object already has.
pub fn map_doc_status(workspace: &str, record: SourceRecord, log: &mut MappingLog) -> DocStatusRow {
    let (key, mut map, raw) = open_record(record, log);

    let content_summary = raw.or_else(|| take_text(&mut map, "content_summary"));
    let content_length = take_i32(&mut map, "content_length").unwrap_or(0);
    let status = take_text(&mut map, "status").unwrap_or_else(|| DEFAULT_STATUS.to_string());
    let status = log.fit_width(&key, "status", status, MAX_STATUS_CHARS);
    let file_path = take_text(&mut map, "file_path");
    let track_id = take_text(&mut map, "track_id")
        .map(|t| log.fit_width(&key, "track_id", t, MAX_REF_CHARS));
    let error_msg = take_text(&mut map, "error_msg").or_else(|| take_text(&mut map, "error"));
    let created_at = take_timestamp(&mut map, "created_at")
        .or_else(|| take_timestamp(&mut map, "create_time"));
    let updated_at = take_timestamp(&mut map, "updated_at")
        .or_else(|| take_timestamp(&mut map, "update_time"));

    let (chunks_list, mismatch) = take_array(&mut map, "chunks_list");
    note_shape(log, &key, mismatch);
    let listed = chunks_list.as_array().map_or(0, Vec::len);
    let chunks_count = take_i32(&mut map, "chunks_count")
        .unwrap_or_else(|| i32::try_from(listed).unwrap_or(i32::MAX));

    let (mut metadata, mismatch) = take_object(&mut map, "metadata");
    note_shape(log, &key, mismatch);
    for (field, value) in map {
        metadata.entry(field).or_insert(value);
    }

    DocStatusRow {
        workspace: workspace.to_string(),
        id: key,
        content_summary,
        content_length,
        chunks_count,
        status,
        file_path,
        chunks_list,
        track_id,
        metadata,
        error_msg,
        created_at,
        updated_at,
    }
}

/// Row of `LIGHTRAG_DOC_CHUNKS`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRow {
    pub workspace: String,
    pub id: String,
    pub full_doc_id: Option<String>,
    pub chunk_order_index: i32,
    pub tokens: i32,
    pub content: Option<String>,
    pub file_path: Option<String>,
    pub llm_cache_list: Value,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

impl TargetRow for ChunkRow {
    fn into_values(self) -> Row {
        vec![
            self.workspace.into(),
            self.id.into(),
            SqlValue::opt_text(self.full_doc_id),
            self.chunk_order_index.into(),
            self.tokens.into(),
            SqlValue::opt_text(self.content),
            SqlValue::opt_text(self.file_path),
            SqlValue::Json(self.llm_cache_list),
            SqlValue::opt_timestamp(self.create_time),
            SqlValue::opt_timestamp(self.update_time),
        ]
    }
}

/// Map a text chunk record. A blank key falls back to the record's `_id`.
pub fn map_chunk(workspace: &str, record: SourceRecord, log: &mut MappingLog) -> ChunkRow {
    let (key, mut map, raw) = open_record(record, log);

    let explicit_id = take_text(&mut map, "_id");
    let id = if key.trim().is_empty() {
        match explicit_id {
            Some(id) => id,
            None => {
                log.coerced(&key, "blank key and no '_id'");
                key
            }
        }
    } else {
        key
    };

    let (llm_cache_list, mismatch) = take_array(&mut map, "llm_cache_list");
    note_shape(log, &id, mismatch);
    let full_doc_id = take_text(&mut map, "full_doc_id")
        .map(|d| log.fit_width(&id, "full_doc_id", d, MAX_REF_CHARS));

    ChunkRow {
        workspace: workspace.to_string(),
        full_doc_id,
        chunk_order_index: take_i32(&mut map, "chunk_order_index").unwrap_or(0),
        tokens: take_i32(&mut map, "tokens").unwrap_or(0),
        content: raw.or_else(|| take_text(&mut map, "content")),
        file_path: take_text(&mut map, "file_path"),
        llm_cache_list,
        create_time: take_timestamp(&mut map, "create_time"),
        update_time: take_timestamp(&mut map, "update_time"),
        id,
    }
}

/// Row of `LIGHTRAG_LLM_CACHE`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub workspace: String,
    pub id: String,
    pub original_prompt: Option<String>,
    pub return_value: Option<String>,
    pub chunk_id: Option<String>,
    pub cache_type: String,
    pub queryparam: Option<Value>,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

impl TargetRow for CacheRow {
    fn into_values(self) -> Row {
        vec![
            self.workspace.into(),
            self.id.into(),
            SqlValue::opt_text(self.original_prompt),
            SqlValue::opt_text(self.return_value),
            SqlValue::opt_text(self.chunk_id),
            self.cache_type.into(),
            SqlValue::opt_json(self.queryparam),
            SqlValue::opt_timestamp(self.create_time),
            SqlValue::opt_timestamp(self.update_time),
        ]
    }
}

/// Map an LLM cache entry. Non-string responses are stored as JSON text.
pub fn map_cache_entry(workspace: &str, record: SourceRecord, log: &mut MappingLog) -> CacheRow {
    let (key, mut map, raw) = open_record(record, log);

    let return_value = raw
        .or_else(|| take_text(&mut map, "return"))
        .or_else(|| take_text(&mut map, "return_value"));
    let queryparam = match map.remove("queryparam") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v),
    };
    let chunk_id = take_text(&mut map, "chunk_id")
        .map(|c| log.fit_width(&key, "chunk_id", c, MAX_REF_CHARS));
    let cache_type = take_text(&mut map, "cache_type")
        .unwrap_or_else(|| DEFAULT_CACHE_TYPE.to_string());
    let cache_type = log.fit_width(&key, "cache_type", cache_type, MAX_CACHE_TYPE_CHARS);

    CacheRow {
        workspace: workspace.to_string(),
        id: key,
        original_prompt: take_text(&mut map, "original_prompt"),
        return_value,
        chunk_id,
        cache_type,
        queryparam,
        create_time: take_timestamp(&mut map, "create_time"),
        update_time: take_timestamp(&mut map, "update_time"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnSpec, TableSpec};
    use serde_json::json;

    fn record(key: &str, body: Value) -> SourceRecord {
        SourceRecord::new(key, body)
    }

    #[test]
    fn test_map_document_name_fallbacks() {
        let mut log = MappingLog::new();
        let row = map_document("ws", record("doc-1", json!({"content": "x", "file_path": "a.txt"})), &mut log);
        assert_eq!(row.doc_name, "a.txt");
        assert_eq!(row.meta["file_path"], json!("a.txt"));

        let row = map_document("ws", record("doc-2", json!({"content": "x"})), &mut log);
        assert_eq!(row.doc_name, "doc-2");
        assert!(row.meta.is_empty());

        let long = "n".repeat(2000);
        let row = map_document("ws", record("doc-3", json!({"doc_name": long})), &mut log);
        assert_eq!(row.doc_name.chars().count(), MAX_NAME_CHARS);
        assert_eq!(log.coerced_count(), 1);
    }

    #[test]
    fn test_map_document_timestamps() {
        let mut log = MappingLog::new();
        let row = map_document(
            "ws",
            record("d", json!({"create_time": 1_700_000_000, "update_time": "yesterday"})),
            &mut log,
        );
        assert_eq!(row.create_time.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(row.update_time, None);
    }

    #[test]
    fn test_malformed_record_yields_degenerate_row() {
        let mut log = MappingLog::new();
        let row = map_document("ws", record("doc-9", json!("just text")), &mut log);
        assert_eq!(row.content.as_deref(), Some("just text"));
        assert!(row.meta.is_empty());
        assert_eq!(log.coerced_count(), 1);

        let row = map_doc_status("ws", record("doc-9", json!(42)), &mut log);
        assert_eq!(row.content_summary.as_deref(), Some("42"));
        assert_eq!(row.status, DEFAULT_STATUS);
        assert_eq!(log.coerced_count(), 2);
    }

    #[test]
    fn test_map_doc_status_defaults() {
        let mut log = MappingLog::new();
        let row = map_doc_status("ws", record("doc-1", json!({"chunks_list": ["c1", "c2", "c3"]})), &mut log);
        assert_eq!(row.status, "pending");
        assert_eq!(row.content_length, 0);
        assert_eq!(row.chunks_count, 3);
        assert_eq!(row.chunks_list, json!(["c1", "c2", "c3"]));
        assert!(row.metadata.is_empty());
        assert_eq!(row.created_at, None);
    }

    #[test]
    fn test_map_doc_status_timestamp_spellings() {
        let mut log = MappingLog::new();
        let row = map_doc_status(
            "ws",
            record("doc-1", json!({"create_time": 1_700_000_000, "update_time": "not a number"})),
            &mut log,
        );
        assert_eq!(row.created_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(row.updated_at, None);
        assert!(!row.metadata.contains_key("update_time"));
    }

    #[test]
    fn test_map_doc_status_residual_goes_to_metadata() {
        let mut log = MappingLog::new();
        let row = map_doc_status(
            "ws",
            record(
                "doc-1",
                json!({
                    "status": "processed",
                    "chunks_count": 5,
                    "metadata": {"lang": "en"},
                    "lang": "de",
                    "extra": true
                }),
            ),
            &mut log,
        );
        assert_eq!(row.status, "processed");
        assert_eq!(row.chunks_count, 5);
        assert_eq!(row.metadata["lang"], json!("en"));
        assert_eq!(row.metadata["extra"], json!(true));
        assert_eq!(row.into_values().len(), 13);
    }

    #[test]
    fn test_map_chunk_uses_id_field_for_blank_key() {
        let mut log = MappingLog::new();
        let row = map_chunk(
            "ws",
            record("", json!({"_id": "chunk-7", "tokens": 120, "chunk_order_index": 2, "content": "c"})),
            &mut log,
        );
        assert_eq!(row.id, "chunk-7");
        assert_eq!(row.tokens, 120);
        assert_eq!(row.chunk_order_index, 2);
        assert_eq!(row.llm_cache_list, json!([]));
        assert_eq!(log.coerced_count(), 0);

        let row = map_chunk("ws", record("chunk-1", json!({"_id": "other"})), &mut log);
        assert_eq!(row.id, "chunk-1");
    }

    #[test]
    fn test_map_cache_entry() {
        let mut log = MappingLog::new();
        let row = map_cache_entry(
            "ws",
            record("default:abc", json!({"return": {"answer": 1}, "original_prompt": "q"})),
            &mut log,
        );
        assert_eq!(row.cache_type, DEFAULT_CACHE_TYPE);
        assert_eq!(row.return_value.as_deref(), Some("{\"answer\":1}"));
        assert_eq!(row.queryparam, None);

        let row = map_cache_entry(
            "ws",
            record("k", json!({"return_value": "text", "cache_type": "query", "queryparam": {"mode": "local"}})),
            &mut log,
        );
        assert_eq!(row.return_value.as_deref(), Some("text"));
        assert_eq!(row.cache_type, "query");
        assert_eq!(row.queryparam, Some(json!({"mode": "local"})));
        assert_eq!(row.into_values().len(), 9);
    }

    /// Declared width of `column` in `table`.
    fn width(table: &TableSpec, column: &str) -> usize {
        table
            .columns
            .iter()
            .find(|c| c.name == column)
            .and_then(ColumnSpec::max_chars)
            .unwrap()
    }

    #[test]
    fn test_doc_status_fields_fit_their_columns() {
        let table = TableSpec::doc_status("public");
        let mut log = MappingLog::new();
        let row = map_doc_status(
            "ws",
            record("doc-1", json!({"status": "s".repeat(100), "track_id": "t".repeat(300)})),
            &mut log,
        );
        assert_eq!(row.status.chars().count(), width(&table, "status"));
        assert_eq!(row.track_id.unwrap().chars().count(), width(&table, "track_id"));
        assert_eq!(log.coerced_count(), 2);

        let row = map_doc_status("ws", record("doc-2", json!({"status": "processed"})), &mut log);
        assert_eq!(row.status, "processed");
        assert_eq!(log.coerced_count(), 2);
    }

    #[test]
    fn test_chunk_full_doc_id_fits_its_column() {
        let table = TableSpec::text_chunks("public");
        let mut log = MappingLog::new();
        let row = map_chunk("ws", record("chunk-1", json!({"full_doc_id": "é".repeat(400)})), &mut log);
        assert_eq!(row.full_doc_id.unwrap().chars().count(), width(&table, "full_doc_id"));
        assert_eq!(log.coerced_count(), 1);
    }

    #[test]
    fn test_cache_fields_fit_their_columns() {
        let table = TableSpec::llm_cache("public");
        let mut log = MappingLog::new();
        let row = map_cache_entry(
            "ws",
            record("k", json!({"cache_type": "c".repeat(40), "chunk_id": "x".repeat(256)})),
            &mut log,
        );
        assert_eq!(row.cache_type.chars().count(), width(&table, "cache_type"));
        assert_eq!(row.chunk_id.unwrap().chars().count(), width(&table, "chunk_id"));
        assert_eq!(log.coerced_count(), 2);
        assert!(log.warnings()[0].to_string().contains("chunk_id"));
    }
}
