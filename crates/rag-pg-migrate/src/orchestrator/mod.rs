//! Migration orchestrator - main workflow coordinator.
//!
//! Every configured data set goes through read, map, load and verify on its
//! own. A failure is recorded in that data set's summary and the run moves on
//! to the next one. Graph edges are the exception: they need the vertex id
//! map built by the vertex phase of the same run.

mod phase;
mod report;

pub use phase::{Phase, PhaseTracker};
pub use report::{Dataset, DatasetStatus, DatasetSummary, MigrationReport, MAX_REPORTED_WARNINGS};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Config, DatasetKind};
use crate::core::{Row, TableSpec, VertexIdMap};
use crate::error::{MigrateError, Result};
use crate::mapper::{
    map_cache_entry, map_chunk, map_doc_status, map_document, map_edges, map_vertex, MappingLog,
    TargetRow,
};
use crate::source::{
    flatten_cache_buckets, read_graph_file, read_kv_file, GraphDocument, GraphEdge, SourceRecord,
};
use crate::target::{PgStore, TargetStore};
use crate::transfer::{BatchLoader, BatchProgress, LoadStats};
use crate::verify::{verify, verify_table, Verification};

type RecordMapper = fn(&str, SourceRecord, &mut MappingLog) -> Row;

/// How a key-value data set is read, mapped and written.
struct KvPlan {
    dataset: Dataset,
    table: TableSpec,
    mapper: RecordMapper,
    batch_size: usize,
    tolerance: f64,
}

/// What the vertex phase hands to the edge phase.
struct VertexPhase {
    ids: VertexIdMap,
    edges: Vec<GraphEdge>,
    edge_label_id: u32,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    store: Arc<dyn TargetStore>,
    progress: Option<mpsc::Sender<BatchProgress>>,
}

/// Result of probing the target store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub store_type: String,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    /// Apache AGE is installed.
    pub graph_extension: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Source and target counts of one data set, without writing anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetCheck {
    pub dataset: Dataset,
    pub table: String,
    pub source_path: PathBuf,
    /// `None` when the source file does not exist.
    pub verification: Option<Verification>,
}

impl Orchestrator {
    /// Create an orchestrator writing to PostgreSQL.
    pub async fn new(config: Config) -> Result<Self> {
        let max_conns = config.migration.get_max_pg_connections();
        let store = PgStore::new(&config.target, max_conns).await?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Create an orchestrator over an existing store.
    pub fn with_store(config: Config, store: Arc<dyn TargetStore>) -> Self {
        Self {
            config,
            store,
            progress: None,
        }
    }

    /// Forward batch progress events to `tx`.
    pub fn with_progress(mut self, tx: mpsc::Sender<BatchProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn TargetStore> {
        self.store.clone()
    }

    /// Run the migration.
    ///
    /// Per-data-set failures end up in the report; only problems outside any
    /// data set return an error.
    pub async fn run(&self, cancel: Option<CancellationToken>) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = cancel.unwrap_or_default();
        let migration = &self.config.migration;

        info!(
            "Starting migration run {} (workspace '{}', graph '{}', store {})",
            run_id,
            migration.workspace,
            migration.graph_name,
            self.store.store_type()
        );

        let mut datasets = Vec::new();
        if migration.parallel_datasets {
            info!("Running {} data sets concurrently", migration.datasets.len());
            let runs = migration
                .datasets
                .iter()
                .map(|kind| self.migrate_kind(*kind, &cancel));
            for summaries in join_all(runs).await {
                datasets.extend(summaries);
            }
        } else {
            for kind in &migration.datasets {
                datasets.extend(self.migrate_kind(*kind, &cancel).await);
            }
        }

        let completed_at = Utc::now();
        let report = MigrationReport {
            run_id,
            workspace: migration.workspace.clone(),
            graph_name: migration.graph_name.clone(),
            config_hash: self.config.hash(),
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            datasets,
        };

        for summary in &report.datasets {
            info!(
                "{}: {} ({} migrated, {} skipped, {} coerced, {}/{} in target)",
                summary.dataset,
                summary.status,
                summary.migrated_count,
                summary.skipped_count,
                summary.coerced_count,
                summary.target_count,
                summary.source_count
            );
        }
        info!(
            "Migration {}: {} rows in {:.1}s",
            report.status(),
            report.rows_migrated(),
            report.duration_seconds
        );

        Ok(report)
    }

    /// Count source and target rows of every configured data set and verify
    /// them. Nothing is written.
    pub async fn validate(&self) -> Result<Vec<DatasetCheck>> {
        let migration = &self.config.migration;
        let mut checks = Vec::new();

        for kind in &migration.datasets {
            let path = self.config.sources.path_for(*kind);

            if *kind == DatasetKind::Graph {
                let vertices = self.vertex_table();
                let edges = self.edge_table();
                let counts = if path.exists() {
                    let doc = read_graph_file(&path)?;
                    Some((doc.nodes.len() as u64, doc.edges.len() as u64))
                } else {
                    None
                };

                let mut vertex_check = self.check(Dataset::GraphVertices, &vertices, &path);
                let mut edge_check = self.check(Dataset::GraphEdges, &edges, &path);
                if let Some((node_count, edge_count)) = counts {
                    vertex_check.verification = Some(
                        verify_table(
                            self.store.as_ref(),
                            &vertices,
                            &migration.workspace,
                            node_count,
                            migration.tolerances.vertices(),
                        )
                        .await?,
                    );
                    edge_check.verification = Some(
                        verify_table(
                            self.store.as_ref(),
                            &edges,
                            &migration.workspace,
                            edge_count,
                            migration.tolerances.edges(),
                        )
                        .await?,
                    );
                }
                checks.push(vertex_check);
                checks.push(edge_check);
                continue;
            }

            let Some(plan) = self.kv_plan(*kind) else {
                continue;
            };
            let mut check = self.check(plan.dataset, &plan.table, &path);
            if path.exists() {
                let source_count = read_records(*kind, &path)?.len() as u64;
                check.verification = Some(
                    verify_table(
                        self.store.as_ref(),
                        &plan.table,
                        &migration.workspace,
                        source_count,
                        plan.tolerance,
                    )
                    .await?,
                );
            }
            checks.push(check);
        }

        Ok(checks)
    }

    /// Probe the target store.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let start = Instant::now();
        let probe = self.store.health_check().await;
        let latency = start.elapsed().as_millis() as u64;
        let store_type = self.store.store_type().to_string();

        let result = match probe {
            Ok(health) => HealthCheckResult {
                store_type,
                target_connected: true,
                target_latency_ms: latency,
                server_version: Some(health.server_version),
                graph_extension: health.graph_extension,
                target_error: if health.graph_extension {
                    None
                } else {
                    Some("extension 'age' is not installed".to_string())
                },
                healthy: health.graph_extension,
            },
            Err(e) => HealthCheckResult {
                store_type,
                target_connected: false,
                target_latency_ms: latency,
                server_version: None,
                graph_extension: false,
                target_error: Some(e.to_string()),
                healthy: false,
            },
        };
        Ok(result)
    }

    /// Release store connections.
    pub async fn close(&self) {
        self.store.close().await;
    }

    async fn migrate_kind(&self, kind: DatasetKind, cancel: &CancellationToken) -> Vec<DatasetSummary> {
        match kind {
            DatasetKind::Graph => self.migrate_graph(cancel).await,
            _ => self.migrate_kv(kind, cancel).await.into_iter().collect(),
        }
    }

    fn vertex_table(&self) -> TableSpec {
        let m = &self.config.migration;
        TableSpec::vertices(&m.graph_name, &m.vertex_label)
    }

    fn edge_table(&self) -> TableSpec {
        let m = &self.config.migration;
        TableSpec::edges(&m.graph_name, &m.edge_label)
    }

    fn check(&self, dataset: Dataset, table: &TableSpec, path: &Path) -> DatasetCheck {
        DatasetCheck {
            dataset,
            table: table.full_name(),
            source_path: path.to_path_buf(),
            verification: None,
        }
    }

    fn kv_plan(&self, kind: DatasetKind) -> Option<KvPlan> {
        let schema = &self.config.target.schema;
        let (dataset, table, mapper) = match kind {
            DatasetKind::Graph => return None,
            DatasetKind::FullDocs => (
                Dataset::FullDocs,
                TableSpec::full_docs(schema),
                document_row as RecordMapper,
            ),
            DatasetKind::DocStatus => (
                Dataset::DocStatus,
                TableSpec::doc_status(schema),
                doc_status_row as RecordMapper,
            ),
            DatasetKind::TextChunks => (
                Dataset::TextChunks,
                TableSpec::text_chunks(schema),
                chunk_row as RecordMapper,
            ),
            DatasetKind::LlmCache => (
                Dataset::LlmCache,
                TableSpec::llm_cache(schema),
                cache_row as RecordMapper,
            ),
        };
        let migration = &self.config.migration;
        Some(KvPlan {
            dataset,
            table,
            mapper,
            batch_size: migration.batch_sizes.for_kind(kind),
            tolerance: migration.tolerances.for_kind(kind),
        })
    }

    fn loader(&self) -> BatchLoader {
        let loader = BatchLoader::new(self.store.clone());
        match &self.progress {
            Some(tx) => loader.with_progress(tx.clone()),
            None => loader,
        }
    }

    /// Existing target rows when the data set can be skipped.
    async fn completed_rows(&self, table: &TableSpec, source_count: u64) -> Result<Option<u64>> {
        let migration = &self.config.migration;
        if !migration.skip_completed || source_count == 0 {
            return Ok(None);
        }
        let existing = self.store.count_rows(table, &migration.workspace).await?;
        if existing >= source_count {
            info!(
                "{}: {} rows already present for {} source records, skipping",
                table.full_name(),
                existing,
                source_count
            );
            return Ok(Some(existing));
        }
        Ok(None)
    }

    async fn migrate_kv(&self, kind: DatasetKind, cancel: &CancellationToken) -> Option<DatasetSummary> {
        let plan = self.kv_plan(kind)?;
        let summary = DatasetSummary::new(plan.dataset, plan.table.full_name());
        if cancel.is_cancelled() {
            return Some(summary.with_status(DatasetStatus::Cancelled, None));
        }

        let path = self.config.sources.path_for(kind);
        if !path.exists() {
            info!("{}: source file {} not found, skipping", plan.dataset, path.display());
            return Some(summary.with_status(DatasetStatus::Missing, None));
        }

        let mut summary = summary;
        let start = Instant::now();
        let result = self
            .migrate_records(kind, &path, &plan, &mut summary, cancel)
            .await;
        summary.duration_seconds = start.elapsed().as_secs_f64();
        if let Err(e) = result {
            record_failure(&mut summary, e);
        }
        Some(summary)
    }

    async fn migrate_records(
        &self,
        kind: DatasetKind,
        path: &Path,
        plan: &KvPlan,
        summary: &mut DatasetSummary,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let workspace = &self.config.migration.workspace;
        let mut tracker = PhaseTracker::new(plan.dataset.as_str());

        tracker.advance(Phase::Reading)?;
        let records = read_records(kind, path)?;
        summary.source_count = records.len() as u64;
        info!(
            "{}: read {} records from {}",
            plan.dataset,
            records.len(),
            path.display()
        );

        self.store.prepare_table(&plan.table).await?;
        if let Some(existing) = self.completed_rows(&plan.table, summary.source_count).await? {
            summary.target_count = existing;
            summary.verification = Some(verify(summary.source_count, existing, plan.tolerance));
            summary.status = DatasetStatus::AlreadyMigrated;
            tracker.finish();
            return Ok(());
        }

        tracker.advance(Phase::Mapping)?;
        let mut log = MappingLog::new();
        let rows: Vec<Row> = records
            .into_iter()
            .map(|record| (plan.mapper)(workspace, record, &mut log))
            .collect();
        summary.coerced_count = log.coerced_count();
        summary.set_warnings(log.into_warnings());

        tracker.advance(Phase::Loading)?;
        let stats = self
            .loader()
            .load(&plan.table, rows, plan.batch_size, cancel)
            .await?;
        record_load(summary, &stats);
        if stats.cancelled {
            summary.status = DatasetStatus::Cancelled;
            return Ok(());
        }

        tracker.advance(Phase::Verifying)?;
        let verification = verify_table(
            self.store.as_ref(),
            &plan.table,
            workspace,
            summary.source_count,
            plan.tolerance,
        )
        .await?;
        summary.target_count = verification.target_count;
        summary.verification = Some(verification);

        tracker.advance(Phase::Done)?;
        summary.status = DatasetStatus::Completed;
        Ok(())
    }

    async fn migrate_graph(&self, cancel: &CancellationToken) -> Vec<DatasetSummary> {
        let vertex_table = self.vertex_table();
        let edge_table = self.edge_table();
        let mut vertices = DatasetSummary::new(Dataset::GraphVertices, vertex_table.full_name());
        let mut edges = DatasetSummary::new(Dataset::GraphEdges, edge_table.full_name());

        if cancel.is_cancelled() {
            return vec![
                vertices.with_status(DatasetStatus::Cancelled, None),
                edges.with_status(DatasetStatus::Cancelled, None),
            ];
        }

        let path = self.config.sources.path_for(DatasetKind::Graph);
        if !path.exists() {
            info!("graph: source file {} not found, skipping", path.display());
            return vec![
                vertices.with_status(DatasetStatus::Missing, None),
                edges.with_status(DatasetStatus::Missing, None),
            ];
        }

        let start = Instant::now();
        let vertex_result = self
            .migrate_vertices(&path, &vertex_table, &mut vertices, cancel)
            .await;
        vertices.duration_seconds = start.elapsed().as_secs_f64();

        let graph = match vertex_result {
            Ok(Some(graph)) => graph,
            Ok(None) => {
                return vec![vertices, edges.with_status(DatasetStatus::Cancelled, None)];
            }
            Err(e) => {
                record_failure(&mut vertices, e);
                let blocked = format!("vertex phase {}", vertices.status);
                error!("{}: blocked: {}", Dataset::GraphEdges, blocked);
                return vec![vertices, edges.with_status(DatasetStatus::Blocked, Some(blocked))];
            }
        };

        if cancel.is_cancelled() {
            return vec![vertices, edges.with_status(DatasetStatus::Cancelled, None)];
        }

        let start = Instant::now();
        let edge_result = self
            .migrate_edges(&edge_table, graph, &mut edges, cancel)
            .await;
        edges.duration_seconds = start.elapsed().as_secs_f64();
        if let Err(e) = edge_result {
            record_failure(&mut edges, e);
        }

        vec![vertices, edges]
    }

    /// Returns `None` when the load was cancelled.
    async fn migrate_vertices(
        &self,
        path: &Path,
        table: &TableSpec,
        summary: &mut DatasetSummary,
        cancel: &CancellationToken,
    ) -> Result<Option<VertexPhase>> {
        let migration = &self.config.migration;
        let tolerance = migration.tolerances.vertices();
        let mut tracker = PhaseTracker::new(Dataset::GraphVertices.as_str());

        tracker.advance(Phase::Reading)?;
        let GraphDocument { nodes, edges } = read_graph_file(path)?;
        summary.source_count = nodes.len() as u64;
        info!(
            "graph: read {} nodes and {} edges from {}",
            nodes.len(),
            edges.len(),
            path.display()
        );

        let labels = self
            .store
            .ensure_graph(
                &migration.graph_name,
                &migration.vertex_label,
                &migration.edge_label,
            )
            .await?;
        let mut ids = VertexIdMap::new(labels.vertex_label_id)?;

        if let Some(existing) = self.completed_rows(table, summary.source_count).await? {
            // Edges still need every node's id.
            for node in &nodes {
                ids.assign(&node.id)?;
            }
            summary.target_count = existing;
            summary.verification = Some(verify(summary.source_count, existing, tolerance));
            summary.status = DatasetStatus::AlreadyMigrated;
            tracker.finish();
            return Ok(Some(VertexPhase {
                ids,
                edges,
                edge_label_id: labels.edge_label_id,
            }));
        }

        tracker.advance(Phase::Mapping)?;
        let rows = nodes
            .into_iter()
            .map(|node| map_vertex(node, &mut ids).map(TargetRow::into_values))
            .collect::<Result<Vec<Row>>>()?;

        tracker.advance(Phase::Loading)?;
        let stats = self
            .loader()
            .load_concurrent(
                table,
                rows,
                migration.batch_sizes.vertices,
                migration.get_max_in_flight_batches(),
                cancel,
            )
            .await?;
        record_load(summary, &stats);
        if stats.cancelled {
            summary.status = DatasetStatus::Cancelled;
            return Ok(None);
        }
        self.store
            .sync_label_sequence(table, ids.last_sequence())
            .await?;

        tracker.advance(Phase::Verifying)?;
        let verification = verify_table(
            self.store.as_ref(),
            table,
            &migration.workspace,
            summary.source_count,
            tolerance,
        )
        .await?;
        summary.target_count = verification.target_count;
        summary.verification = Some(verification);

        tracker.advance(Phase::Done)?;
        summary.status = DatasetStatus::Completed;
        Ok(Some(VertexPhase {
            ids,
            edges,
            edge_label_id: labels.edge_label_id,
        }))
    }

    async fn migrate_edges(
        &self,
        table: &TableSpec,
        graph: VertexPhase,
        summary: &mut DatasetSummary,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let migration = &self.config.migration;
        let tolerance = migration.tolerances.edges();
        let mut tracker = PhaseTracker::new(Dataset::GraphEdges.as_str());

        // Edges were read together with the vertices.
        tracker.advance(Phase::Reading)?;
        summary.source_count = graph.edges.len() as u64;

        tracker.advance(Phase::Mapping)?;
        let mut log = MappingLog::new();
        let rows = map_edges(graph.edges, &graph.ids, graph.edge_label_id, &mut log)?;
        summary.skipped_count = log.skipped_count();
        summary.set_warnings(log.into_warnings());
        let kept = rows.len() as u64;

        if let Some(existing) = self.completed_rows(table, kept).await? {
            summary.target_count = existing;
            summary.verification = Some(verify(summary.source_count, existing, tolerance));
            summary.status = DatasetStatus::AlreadyMigrated;
            tracker.finish();
            return Ok(());
        }

        tracker.advance(Phase::Loading)?;
        let rows: Vec<Row> = rows.into_iter().map(TargetRow::into_values).collect();
        let stats = self
            .loader()
            .load(table, rows, migration.batch_sizes.edges, cancel)
            .await?;
        record_load(summary, &stats);
        if stats.cancelled {
            summary.status = DatasetStatus::Cancelled;
            return Ok(());
        }
        self.store.sync_label_sequence(table, kept).await?;

        tracker.advance(Phase::Verifying)?;
        let verification = verify_table(
            self.store.as_ref(),
            table,
            &migration.workspace,
            summary.source_count,
            tolerance,
        )
        .await?;
        summary.target_count = verification.target_count;
        summary.verification = Some(verification);

        tracker.advance(Phase::Done)?;
        summary.status = DatasetStatus::Completed;
        Ok(())
    }
}

fn document_row(workspace: &str, record: SourceRecord, log: &mut MappingLog) -> Row {
    map_document(workspace, record, log).into_values()
}

fn doc_status_row(workspace: &str, record: SourceRecord, log: &mut MappingLog) -> Row {
    map_doc_status(workspace, record, log).into_values()
}

fn chunk_row(workspace: &str, record: SourceRecord, log: &mut MappingLog) -> Row {
    map_chunk(workspace, record, log).into_values()
}

fn cache_row(workspace: &str, record: SourceRecord, log: &mut MappingLog) -> Row {
    map_cache_entry(workspace, record, log).into_values()
}

fn read_records(kind: DatasetKind, path: &Path) -> Result<Vec<SourceRecord>> {
    let records = read_kv_file(path)?;
    Ok(match kind {
        DatasetKind::LlmCache => flatten_cache_buckets(records),
        _ => records,
    })
}

fn record_load(summary: &mut DatasetSummary, stats: &LoadStats) {
    summary.migrated_count = stats.rows;
    summary.rows_per_second = stats.rows_per_second();
}

fn record_failure(summary: &mut DatasetSummary, e: MigrateError) {
    if matches!(e, MigrateError::Cancelled) {
        summary.status = DatasetStatus::Cancelled;
        return;
    }
    error!("{}: failed: {}", summary.dataset, e);
    summary.status = DatasetStatus::Failed;
    summary.error = Some(e.to_string());
}
