//! Batch loader: writes mapped rows through a [`TargetStore`].
//!
//! Rows are split into batches sized to the configured batch size and to the
//! bind parameter limit. Each batch is one idempotent upsert in one
//! transaction, so a failed batch leaves nothing behind and a re-run simply
//! rewrites the same keys. Cancellation is checked between batches only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::{Row, SqlValue, TableSpec};
use crate::error::{MigrateError, Result};
use crate::target::{TargetStore, MAX_BIND_PARAMS};

/// Progress event sent after every committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub table: String,
    pub batches_done: u64,
    pub rows_done: u64,
    pub rows_total: u64,
}

/// Statistics from loading one data set.
#[derive(Debug, Clone, Default)]
pub struct LoadStats {
    /// Rows written, after collapsing duplicate keys.
    pub rows: u64,

    /// Batches committed.
    pub batches: u64,

    /// Rows dropped because a later row in the same batch had the same key.
    pub duplicates: u64,

    /// Time spent inside the store.
    pub write_time: Duration,

    /// Wall-clock time of the whole load.
    pub elapsed: Duration,

    /// The load stopped early because the token was cancelled.
    pub cancelled: bool,
}

impl LoadStats {
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows as f64 / secs
        } else {
            0.0
        }
    }

    fn record_batch(&mut self, rows: u64, write_time: Duration) {
        self.rows += rows;
        self.batches += 1;
        self.write_time += write_time;
    }
}

/// Batch loader over a shared store handle.
#[derive(Clone)]
pub struct BatchLoader {
    store: Arc<dyn TargetStore>,
    progress: Option<mpsc::Sender<BatchProgress>>,
}

impl BatchLoader {
    pub fn new(store: Arc<dyn TargetStore>) -> Self {
        Self {
            store,
            progress: None,
        }
    }

    /// Send a [`BatchProgress`] event after every committed batch.
    ///
    /// Events are dropped when the receiver falls behind.
    pub fn with_progress(mut self, tx: mpsc::Sender<BatchProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Batch size actually used for `table`: at least 1, and small enough that
    /// one statement stays within the bind parameter limit.
    pub fn effective_batch_size(table: &TableSpec, requested: usize) -> usize {
        let cap = (MAX_BIND_PARAMS / table.column_count().max(1)).max(1);
        requested.clamp(1, cap)
    }

    /// Upsert one batch. Duplicate keys inside the batch collapse, last wins.
    pub async fn load_batch(&self, table: &TableSpec, rows: Vec<Row>) -> Result<u64> {
        let (rows, _) = dedup_batch(table, rows);
        self.store.upsert_batch(table, rows).await
    }

    /// Load all rows sequentially, one batch at a time.
    pub async fn load(
        &self,
        table: &TableSpec,
        rows: Vec<Row>,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<LoadStats> {
        let start = Instant::now();
        let total = rows.len() as u64;
        let size = Self::effective_batch_size(table, batch_size);
        let mut stats = LoadStats::default();

        for batch in split_batches(rows, size) {
            if cancel.is_cancelled() {
                info!("{}: cancelled after {} batches", table.full_name(), stats.batches);
                stats.cancelled = true;
                break;
            }

            let (batch, dropped) = dedup_batch(table, batch);
            stats.duplicates += dropped;

            let write_start = Instant::now();
            let written = self.store.upsert_batch(table, batch).await.inspect_err(|e| {
                error!("{}: batch {} failed: {}", table.full_name(), stats.batches + 1, e);
            })?;
            stats.record_batch(written, write_start.elapsed());
            self.report(table, &stats, total);
        }

        stats.elapsed = start.elapsed();
        log_throughput(table, &stats);
        Ok(stats)
    }

    /// Load rows with up to `max_in_flight` batches running at once.
    ///
    /// After a failure no new batch is started; batches already in flight
    /// finish, and the first error is returned.
    pub async fn load_concurrent(
        &self,
        table: &TableSpec,
        rows: Vec<Row>,
        batch_size: usize,
        max_in_flight: usize,
        cancel: &CancellationToken,
    ) -> Result<LoadStats> {
        if max_in_flight <= 1 {
            return self.load(table, rows, batch_size, cancel).await;
        }

        let start = Instant::now();
        let total = rows.len() as u64;
        let size = Self::effective_batch_size(table, batch_size);
        let semaphore = Arc::new(Semaphore::new(max_in_flight));
        let shared_table = Arc::new(table.clone());
        let mut tasks: JoinSet<(Result<u64>, Duration)> = JoinSet::new();
        let mut stats = LoadStats::default();
        let mut first_error: Option<MigrateError> = None;

        for batch in split_batches(rows, size) {
            if cancel.is_cancelled() {
                info!("{}: cancelled, waiting for batches in flight", table.full_name());
                stats.cancelled = true;
                break;
            }
            while let Some(joined) = tasks.try_join_next() {
                self.absorb(table, joined, &mut stats, &mut first_error, total);
            }
            if first_error.is_some() {
                break;
            }

            let (batch, dropped) = dedup_batch(table, batch);
            stats.duplicates += dropped;

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| MigrateError::dataset(table.full_name(), e.to_string()))?;
            let store = self.store.clone();
            let task_table = shared_table.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let write_start = Instant::now();
                let result = store.upsert_batch(&task_table, batch).await;
                (result, write_start.elapsed())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            self.absorb(table, joined, &mut stats, &mut first_error, total);
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        stats.elapsed = start.elapsed();
        log_throughput(table, &stats);
        Ok(stats)
    }

    fn absorb(
        &self,
        table: &TableSpec,
        joined: std::result::Result<(Result<u64>, Duration), JoinError>,
        stats: &mut LoadStats,
        first_error: &mut Option<MigrateError>,
        total: u64,
    ) {
        match joined {
            Ok((Ok(written), write_time)) => {
                stats.record_batch(written, write_time);
                self.report(table, stats, total);
            }
            Ok((Err(e), _)) => {
                error!("{}: batch failed: {}", table.full_name(), e);
                first_error.get_or_insert(e);
            }
            Err(e) => {
                error!("{}: batch task failed: {}", table.full_name(), e);
                first_error.get_or_insert(MigrateError::dataset(
                    table.full_name(),
                    format!("batch task failed: {}", e),
                ));
            }
        }
    }

    fn report(&self, table: &TableSpec, stats: &LoadStats, total: u64) {
        debug!(
            "{}: batch {} committed ({}/{} rows)",
            table.full_name(),
            stats.batches,
            stats.rows,
            total
        );
        if let Some(tx) = &self.progress {
            let update = BatchProgress {
                table: table.full_name(),
                batches_done: stats.batches,
                rows_done: stats.rows,
                rows_total: total,
            };
            if let Err(e) = tx.try_send(update) {
                debug!("{}: progress update dropped: {}", table.full_name(), e);
            }
        }
    }
}

fn log_throughput(table: &TableSpec, stats: &LoadStats) {
    info!(
        "{}: loaded {} rows in {} batches, {:.2}s ({:.0} rows/s)",
        table.full_name(),
        stats.rows,
        stats.batches,
        stats.elapsed.as_secs_f64(),
        stats.rows_per_second()
    );
}

fn split_batches(rows: Vec<Row>, size: usize) -> impl Iterator<Item = Vec<Row>> {
    let mut iter = rows.into_iter();
    std::iter::from_fn(move || {
        let batch: Vec<Row> = iter.by_ref().take(size).collect();
        (!batch.is_empty()).then_some(batch)
    })
}

/// Collapse rows sharing a conflict key. The surviving row takes the position
/// of the first occurrence and the values of the last.
fn dedup_batch(table: &TableSpec, rows: Vec<Row>) -> (Vec<Row>, u64) {
    let key_indices = table.conflict_key_indices();
    let mut positions: HashMap<Vec<Option<String>>, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    let mut dropped = 0;

    for row in rows {
        let key: Vec<Option<String>> = key_indices
            .iter()
            .map(|&i| row.get(i).and_then(SqlValue::to_param))
            .collect();
        match positions.get(&key) {
            Some(&pos) => {
                out[pos] = row;
                dropped += 1;
            }
            None => {
                positions.insert(key, out.len());
                out.push(row);
            }
        }
    }

    (out, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MemoryStore;

    fn doc_row(id: &str, content: &str) -> Row {
        vec![
            "default".into(),
            id.into(),
            id.into(),
            content.into(),
            SqlValue::Json(serde_json::json!({})),
            SqlValue::Null,
            SqlValue::Null,
        ]
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n).map(|i| doc_row(&format!("doc-{i}"), "x")).collect()
    }

    #[test]
    fn test_effective_batch_size_respects_param_limit() {
        let table = TableSpec::doc_status("public");
        assert_eq!(BatchLoader::effective_batch_size(&table, 500), 500);
        assert_eq!(BatchLoader::effective_batch_size(&table, 0), 1);
        assert_eq!(
            BatchLoader::effective_batch_size(&table, 1_000_000),
            MAX_BIND_PARAMS / 13
        );
    }

    #[test]
    fn test_dedup_last_wins() {
        let table = TableSpec::full_docs("public");
        let (out, dropped) = dedup_batch(
            &table,
            vec![doc_row("a", "1"), doc_row("b", "2"), doc_row("a", "3")],
        );
        assert_eq!(dropped, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0][1], SqlValue::from("a"));
        assert_eq!(out[0][3], SqlValue::from("3"));
    }

    #[tokio::test]
    async fn test_load_splits_into_batches() {
        let store = Arc::new(MemoryStore::new());
        let loader = BatchLoader::new(store.clone());
        let table = TableSpec::full_docs("public");

        let stats = loader
            .load(&table, rows(25), 10, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.rows, 25);
        assert_eq!(stats.batches, 3);
        assert!(!stats.cancelled);
        assert_eq!(store.count_rows(&table, "default").await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_load_twice_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let loader = BatchLoader::new(store.clone());
        let table = TableSpec::full_docs("public");
        let cancel = CancellationToken::new();

        loader.load(&table, rows(7), 3, &cancel).await.unwrap();
        loader.load(&table, rows(7), 3, &cancel).await.unwrap();
        assert_eq!(store.count_rows(&table, "default").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_at_batch_boundary() {
        let store = Arc::new(MemoryStore::new());
        let loader = BatchLoader::new(store.clone());
        let table = TableSpec::full_docs("public");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = loader.load(&table, rows(10), 5, &cancel).await.unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.rows, 0);
        assert_eq!(store.count_rows(&table, "default").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_batches() {
        let store = Arc::new(MemoryStore::new());
        let table = TableSpec::full_docs("public");
        store.fail_after(&table.full_name(), 2);
        let loader = BatchLoader::new(store.clone());

        let err = loader
            .load(&table, rows(30), 10, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_store_error());
        assert_eq!(store.count_rows(&table, "default").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_full_progress_channel_does_not_block_load() {
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::channel(1);
        let loader = BatchLoader::new(store.clone()).with_progress(tx);
        let table = TableSpec::full_docs("public");

        let stats = loader
            .load(&table, rows(50), 10, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.rows, 50);
        assert_eq!(stats.batches, 5);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.batches_done, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_load_concurrent_writes_every_row() {
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::channel(64);
        let loader = BatchLoader::new(store.clone()).with_progress(tx);
        let table = TableSpec::full_docs("public");

        let stats = loader
            .load_concurrent(&table, rows(95), 10, 4, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.rows, 95);
        assert_eq!(stats.batches, 10);
        assert_eq!(store.count_rows(&table, "default").await.unwrap(), 95);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.rows_done, 95);
        assert_eq!(last.rows_total, 95);
    }

    #[tokio::test]
    async fn test_load_concurrent_surfaces_failure() {
        let store = Arc::new(MemoryStore::new());
        let table = TableSpec::full_docs("public");
        store.fail_after(&table.full_name(), 0);
        let loader = BatchLoader::new(store.clone());

        let result = loader
            .load_concurrent(&table, rows(40), 10, 3, &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }
}
