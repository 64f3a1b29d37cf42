//! In-process target store for dry runs and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{GraphLabels, StoreHealth, TargetStore, MAX_BIND_PARAMS};
use crate::core::{Row, SqlValue, TableKind, TableSpec};
use crate::error::{MigrateError, Result};

/// AGE reserves label ids 1 and 2 for its default vertex and edge labels.
const FIRST_USER_LABEL_ID: u32 = 3;

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, BTreeMap<Vec<Option<String>>, Row>>,
    prepared: HashSet<String>,
    labels: HashMap<(String, String), u32>,
    next_label: HashMap<String, u32>,
    sequences: HashMap<String, u64>,
    batches: HashMap<String, u64>,
    fail_after: HashMap<String, u64>,
}

/// Target store that keeps rows in memory, keyed by conflict key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every upsert into `table` (by full name) fail after
    /// `successful_batches` batches have been committed.
    pub fn fail_after(&self, table: &str, successful_batches: u64) {
        self.lock()
            .fail_after
            .insert(table.to_string(), successful_batches);
    }

    /// Rows of a table in conflict-key order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of committed batches for a table.
    pub fn batch_count(&self, table: &str) -> u64 {
        self.lock().batches.get(table).copied().unwrap_or(0)
    }

    /// Current value of a label sequence.
    pub fn label_sequence(&self, table: &str) -> u64 {
        self.lock().sequences.get(table).copied().unwrap_or(0)
    }

    pub fn is_prepared(&self, table: &str) -> bool {
        self.lock().prepared.contains(table)
    }
}

fn conflict_key(table: &TableSpec, row: &Row) -> Vec<Option<String>> {
    table
        .conflict_key_indices()
        .into_iter()
        .map(|i| row.get(i).and_then(SqlValue::to_param))
        .collect()
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn prepare_table(&self, table: &TableSpec) -> Result<()> {
        if table.kind == TableKind::Relational {
            self.lock().prepared.insert(table.full_name());
        }
        Ok(())
    }

    async fn ensure_graph(
        &self,
        graph: &str,
        vertex_label: &str,
        edge_label: &str,
    ) -> Result<GraphLabels> {
        let mut state = self.lock();
        let mut label_id = |label: &str| -> u32 {
            let key = (graph.to_string(), label.to_string());
            if let Some(id) = state.labels.get(&key) {
                return *id;
            }
            let next = state
                .next_label
                .entry(graph.to_string())
                .or_insert(FIRST_USER_LABEL_ID);
            let id = *next;
            *next += 1;
            state.labels.insert(key, id);
            id
        };
        let vertex_label_id = label_id(vertex_label);
        let edge_label_id = label_id(edge_label);
        drop(state);

        for (label, kind) in [(vertex_label, TableKind::VertexLabel), (edge_label, TableKind::EdgeLabel)] {
            self.lock().prepared.insert(format!("{}.{}", graph, label));
            debug!("Memory store label {}.{} ({:?})", graph, label, kind);
        }

        Ok(GraphLabels {
            vertex_label_id,
            edge_label_id,
        })
    }

    async fn upsert_batch(&self, table: &TableSpec, rows: Vec<Row>) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        if rows.len() * table.column_count() > MAX_BIND_PARAMS {
            return Err(MigrateError::Config(format!(
                "batch of {} rows exceeds {} bind parameters",
                rows.len(),
                MAX_BIND_PARAMS
            )));
        }

        let name = table.full_name();
        let mut state = self.lock();

        let committed = state.batches.get(&name).copied().unwrap_or(0);
        if let Some(limit) = state.fail_after.get(&name) {
            if committed >= *limit {
                return Err(MigrateError::pool(
                    "connection reset",
                    format!("upserting batch into {}", name),
                ));
            }
        }

        for row in &rows {
            if row.len() != table.column_count() {
                return Err(MigrateError::dataset(
                    name,
                    format!("row has {} values, table has {} columns", row.len(), table.column_count()),
                ));
            }
        }

        let count = rows.len() as u64;
        let target = state.tables.entry(name.clone()).or_default();
        for row in rows {
            target.insert(conflict_key(table, &row), row);
        }
        *state.batches.entry(name).or_insert(0) += 1;
        Ok(count)
    }

    async fn count_rows(&self, table: &TableSpec, workspace: &str) -> Result<u64> {
        let state = self.lock();
        let Some(rows) = state.tables.get(&table.full_name()) else {
            return Ok(0);
        };
        let ws_index = table
            .workspace_column
            .as_ref()
            .and_then(|col| table.columns.iter().position(|c| &c.name == col));

        let count = match ws_index {
            Some(i) => rows
                .values()
                .filter(|r| matches!(r.get(i), Some(SqlValue::Text(ws)) if ws == workspace))
                .count(),
            None => rows.len(),
        };
        Ok(count as u64)
    }

    async fn sync_label_sequence(&self, table: &TableSpec, last_sequence: u64) -> Result<()> {
        let mut state = self.lock();
        let current = state.sequences.entry(table.full_name()).or_insert(0);
        *current = (*current).max(last_sequence);
        Ok(())
    }

    async fn health_check(&self) -> Result<StoreHealth> {
        Ok(StoreHealth {
            server_version: "in-memory".to_string(),
            graph_extension: true,
        })
    }

    fn store_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}
