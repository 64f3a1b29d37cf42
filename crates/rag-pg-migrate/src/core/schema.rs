//! Target table definitions.
//!
//! The four key-value stores land in plain relational tables keyed by
//! `(workspace, id)`. Graph vertices and edges land in Apache AGE label tables,
//! which AGE creates itself; only their column layout is described here.

use serde::{Deserialize, Serialize};

use super::identifier::{qualify_pg, quote_pg};
use crate::error::Result;

/// Table name for full documents.
pub const DOC_FULL_TABLE: &str = "LIGHTRAG_DOC_FULL";
/// Table name for document status records.
pub const DOC_STATUS_TABLE: &str = "LIGHTRAG_DOC_STATUS";
/// Table name for text chunks.
pub const DOC_CHUNKS_TABLE: &str = "LIGHTRAG_DOC_CHUNKS";
/// Table name for LLM cache entries.
pub const LLM_CACHE_TABLE: &str = "LIGHTRAG_LLM_CACHE";

const AGTYPE: &str = "ag_catalog.agtype";
const GRAPHID: &str = "ag_catalog.graphid";

/// How a table comes into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// Created with `CREATE TABLE IF NOT EXISTS`.
    Relational,
    /// AGE vertex label table (`create_vlabel`).
    VertexLabel,
    /// AGE edge label table (`create_elabel`).
    EdgeLabel,
}

/// A target column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub pg_type: String,
    pub nullable: bool,
}

impl ColumnSpec {
    fn new(name: &str, pg_type: &str, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            pg_type: pg_type.to_string(),
            nullable,
        }
    }

    /// Character limit of a `varchar(n)` column.
    pub fn max_chars(&self) -> Option<usize> {
        self.pg_type
            .strip_prefix("varchar(")?
            .strip_suffix(')')?
            .parse()
            .ok()
    }

    /// Type a text parameter is cast to before assignment.
    ///
    /// Length-limited character types are cast through `text` so an overlong
    /// value is rejected by the column instead of silently cut by the cast.
    pub fn param_cast(&self) -> &str {
        if self.pg_type.starts_with("varchar") {
            "text"
        } else {
            &self.pg_type
        }
    }
}

/// A target table: layout, conflict key and workspace scoping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Schema (or AGE graph name for label tables).
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    /// Columns of the upsert conflict target.
    pub conflict_key: Vec<String>,
    /// Column row counts are filtered on, if the table is shared between workspaces.
    pub workspace_column: Option<String>,
    pub kind: TableKind,
}

impl TableSpec {
    fn relational(schema: &str, name: &str, columns: Vec<ColumnSpec>) -> Self {
        let mut all = vec![
            ColumnSpec::new("workspace", "varchar(255)", false),
            ColumnSpec::new("id", "varchar(255)", false),
        ];
        all.extend(columns);
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            columns: all,
            conflict_key: vec!["workspace".to_string(), "id".to_string()],
            workspace_column: Some("workspace".to_string()),
            kind: TableKind::Relational,
        }
    }

    /// `LIGHTRAG_DOC_FULL`.
    pub fn full_docs(schema: &str) -> Self {
        Self::relational(
            schema,
            DOC_FULL_TABLE,
            vec![
                ColumnSpec::new("doc_name", "varchar(1024)", true),
                ColumnSpec::new("content", "text", true),
                ColumnSpec::new("meta", "jsonb", false),
                ColumnSpec::new("create_time", "timestamptz", true),
                ColumnSpec::new("update_time", "timestamptz", true),
            ],
        )
    }

    /// `LIGHTRAG_DOC_STATUS`.
    pub fn doc_status(schema: &str) -> Self {
        Self::relational(
            schema,
            DOC_STATUS_TABLE,
            vec![
                ColumnSpec::new("content_summary", "text", true),
                ColumnSpec::new("content_length", "int4", false),
                ColumnSpec::new("chunks_count", "int4", false),
                ColumnSpec::new("status", "varchar(64)", false),
                ColumnSpec::new("file_path", "text", true),
                ColumnSpec::new("chunks_list", "jsonb", false),
                ColumnSpec::new("track_id", "varchar(255)", true),
                ColumnSpec::new("metadata", "jsonb", false),
                ColumnSpec::new("error_msg", "text", true),
                ColumnSpec::new("created_at", "timestamptz", true),
                ColumnSpec::new("updated_at", "timestamptz", true),
            ],
        )
    }

    /// `LIGHTRAG_DOC_CHUNKS`.
    pub fn text_chunks(schema: &str) -> Self {
        Self::relational(
            schema,
            DOC_CHUNKS_TABLE,
            vec![
                ColumnSpec::new("full_doc_id", "varchar(255)", true),
                ColumnSpec::new("chunk_order_index", "int4", false),
                ColumnSpec::new("tokens", "int4", false),
                ColumnSpec::new("content", "text", true),
                ColumnSpec::new("file_path", "text", true),
                ColumnSpec::new("llm_cache_list", "jsonb", false),
                ColumnSpec::new("create_time", "timestamptz", true),
                ColumnSpec::new("update_time", "timestamptz", true),
            ],
        )
    }

    /// `LIGHTRAG_LLM_CACHE`.
    pub fn llm_cache(schema: &str) -> Self {
        Self::relational(
            schema,
            LLM_CACHE_TABLE,
            vec![
                ColumnSpec::new("original_prompt", "text", true),
                ColumnSpec::new("return_value", "text", true),
                ColumnSpec::new("chunk_id", "varchar(255)", true),
                ColumnSpec::new("cache_type", "varchar(32)", false),
                ColumnSpec::new("queryparam", "jsonb", true),
                ColumnSpec::new("create_time", "timestamptz", true),
                ColumnSpec::new("update_time", "timestamptz", true),
            ],
        )
    }

    /// Vertex label table `"graph"."label"`.
    pub fn vertices(graph: &str, label: &str) -> Self {
        Self {
            schema: graph.to_string(),
            name: label.to_string(),
            columns: vec![
                ColumnSpec::new("id", GRAPHID, false),
                ColumnSpec::new("properties", AGTYPE, false),
            ],
            conflict_key: vec!["id".to_string()],
            workspace_column: None,
            kind: TableKind::VertexLabel,
        }
    }

    /// Edge label table `"graph"."label"`.
    pub fn edges(graph: &str, label: &str) -> Self {
        Self {
            schema: graph.to_string(),
            name: label.to_string(),
            columns: vec![
                ColumnSpec::new("id", GRAPHID, false),
                ColumnSpec::new("start_id", GRAPHID, false),
                ColumnSpec::new("end_id", GRAPHID, false),
                ColumnSpec::new("properties", AGTYPE, false),
            ],
            conflict_key: vec!["id".to_string()],
            workspace_column: None,
            kind: TableKind::EdgeLabel,
        }
    }

    /// `schema.name`, unquoted, for logs and map keys.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Quoted `"schema"."name"`.
    pub fn qualified_name(&self) -> Result<String> {
        qualify_pg(&self.schema, &self.name)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Positions of the conflict key columns within a row.
    pub fn conflict_key_indices(&self) -> Vec<usize> {
        self.conflict_key
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| &c.name == k))
            .collect()
    }

    /// Columns updated on conflict.
    pub fn update_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns
            .iter()
            .filter(|c| !self.conflict_key.contains(&c.name))
    }

    /// `CREATE TABLE IF NOT EXISTS` statement.
    ///
    /// Label tables belong to AGE and have no DDL of their own.
    pub fn create_table_ddl(&self) -> Result<Option<String>> {
        if self.kind != TableKind::Relational {
            return Ok(None);
        }

        let mut ddl = format!("CREATE TABLE IF NOT EXISTS {} (\n", self.qualified_name()?);
        for col in &self.columns {
            let nullable = if col.nullable { "" } else { " NOT NULL" };
            ddl.push_str(&format!("    {} {}{},\n", quote_pg(&col.name)?, col.pg_type, nullable));
        }
        let pk = self
            .conflict_key
            .iter()
            .map(|c| quote_pg(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        ddl.push_str(&format!("    PRIMARY KEY ({})\n)", pk));
        Ok(Some(ddl))
    }
}
