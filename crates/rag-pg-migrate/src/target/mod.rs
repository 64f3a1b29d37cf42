//! Target store: where mapped rows are written.
//!
//! [`TargetStore`] is the only seam between the migration engine and the
//! database. [`PgStore`] writes to PostgreSQL with Apache AGE; [`MemoryStore`]
//! keeps everything in process for dry runs and tests.

mod memory;
mod postgres;
mod tls;

pub use memory::MemoryStore;
pub use postgres::{build_upsert_sql, PgStore};
pub use tls::{SslMode, TlsBuilder};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Row, TableSpec};
use crate::error::Result;

/// PostgreSQL's limit on bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// AGE label ids of the migrated graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphLabels {
    pub vertex_label_id: u32,
    pub edge_label_id: u32,
}

/// What a store reports about itself when probed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHealth {
    pub server_version: String,
    pub graph_extension: bool,
}

/// Trait for target store operations.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Create a relational table if it does not exist. Label tables are ignored.
    async fn prepare_table(&self, table: &TableSpec) -> Result<()>;

    /// Create the graph and its two labels on demand and return their ids.
    async fn ensure_graph(
        &self,
        graph: &str,
        vertex_label: &str,
        edge_label: &str,
    ) -> Result<GraphLabels>;

    /// Upsert one batch atomically. Returns the number of rows written.
    ///
    /// Rows must have distinct conflict keys and the batch must fit in
    /// [`MAX_BIND_PARAMS`].
    async fn upsert_batch(&self, table: &TableSpec, rows: Vec<Row>) -> Result<u64>;

    /// Rows in `table` belonging to `workspace` (all rows for label tables).
    /// A table that does not exist yet counts as empty.
    async fn count_rows(&self, table: &TableSpec, workspace: &str) -> Result<u64>;

    /// Move a label's id sequence past `last_sequence`. Never moves it back.
    async fn sync_label_sequence(&self, table: &TableSpec, last_sequence: u64) -> Result<()>;

    /// Probe the store.
    async fn health_check(&self) -> Result<StoreHealth>;

    /// Short name for logs and reports.
    fn store_type(&self) -> &str;

    /// Release connections.
    async fn close(&self);
}
