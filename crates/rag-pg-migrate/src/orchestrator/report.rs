//! Run report: one summary per data set.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DatasetKind;
use crate::error::{RecordWarning, Result};
use crate::verify::Verification;

/// Warnings kept per data set summary. The rest are only counted.
pub const MAX_REPORTED_WARNINGS: usize = 100;

/// A unit of migration work with its own summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    GraphVertices,
    GraphEdges,
    FullDocs,
    DocStatus,
    TextChunks,
    LlmCache,
}

impl Dataset {
    pub fn as_str(self) -> &'static str {
        match self {
            Dataset::GraphVertices => "graph_vertices",
            Dataset::GraphEdges => "graph_edges",
            Dataset::FullDocs => "full_docs",
            Dataset::DocStatus => "doc_status",
            Dataset::TextChunks => "text_chunks",
            Dataset::LlmCache => "llm_cache",
        }
    }

    /// The configured data set this unit belongs to.
    pub fn kind(self) -> DatasetKind {
        match self {
            Dataset::GraphVertices | Dataset::GraphEdges => DatasetKind::Graph,
            Dataset::FullDocs => DatasetKind::FullDocs,
            Dataset::DocStatus => DatasetKind::DocStatus,
            Dataset::TextChunks => DatasetKind::TextChunks,
            Dataset::LlmCache => DatasetKind::LlmCache,
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a data set ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    /// Loaded and verified in this run.
    Completed,
    /// Target already held every source row; nothing written.
    AlreadyMigrated,
    /// Source file not found.
    Missing,
    /// Not attempted because a prerequisite failed.
    Blocked,
    Failed,
    Cancelled,
}

impl DatasetStatus {
    /// The data set left the target complete for its source.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            DatasetStatus::Completed | DatasetStatus::AlreadyMigrated | DatasetStatus::Missing
        )
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatasetStatus::Completed => "completed",
            DatasetStatus::AlreadyMigrated => "already migrated",
            DatasetStatus::Missing => "missing",
            DatasetStatus::Blocked => "blocked",
            DatasetStatus::Failed => "failed",
            DatasetStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Outcome of one data set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub dataset: Dataset,

    /// Target table, `schema.table`.
    pub table: String,

    pub status: DatasetStatus,

    /// Records read from the source file.
    pub source_count: u64,

    /// Rows written in this run.
    pub migrated_count: u64,

    /// Records dropped (edges with a missing endpoint).
    pub skipped_count: u64,

    /// Records written with a degenerate mapping.
    pub coerced_count: u64,

    /// Rows in the target after the run.
    pub target_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,

    pub duration_seconds: f64,

    pub rows_per_second: f64,

    /// First warnings raised while mapping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RecordWarning>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DatasetSummary {
    pub fn new(dataset: Dataset, table: impl Into<String>) -> Self {
        Self {
            dataset,
            table: table.into(),
            status: DatasetStatus::Completed,
            source_count: 0,
            migrated_count: 0,
            skipped_count: 0,
            coerced_count: 0,
            target_count: 0,
            verification: None,
            duration_seconds: 0.0,
            rows_per_second: 0.0,
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Keep the first [`MAX_REPORTED_WARNINGS`] warnings.
    pub fn set_warnings(&mut self, warnings: Vec<RecordWarning>) {
        self.warnings = warnings.into_iter().take(MAX_REPORTED_WARNINGS).collect();
    }

    pub(crate) fn with_status(mut self, status: DatasetStatus, error: Option<String>) -> Self {
        self.status = status;
        self.error = error;
        self
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    pub workspace: String,

    pub graph_name: String,

    /// SHA256 of the configuration used.
    pub config_hash: String,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub duration_seconds: f64,

    pub datasets: Vec<DatasetSummary>,
}

impl MigrationReport {
    pub fn dataset(&self, dataset: Dataset) -> Option<&DatasetSummary> {
        self.datasets.iter().find(|s| s.dataset == dataset)
    }

    pub fn rows_migrated(&self) -> u64 {
        self.datasets.iter().map(|s| s.migrated_count).sum()
    }

    /// Data sets that failed or could not run.
    pub fn failed(&self) -> Vec<Dataset> {
        self.datasets
            .iter()
            .filter(|s| matches!(s.status, DatasetStatus::Failed | DatasetStatus::Blocked))
            .map(|s| s.dataset)
            .collect()
    }

    pub fn was_cancelled(&self) -> bool {
        self.datasets
            .iter()
            .any(|s| s.status == DatasetStatus::Cancelled)
    }

    /// Overall status: "failed", "cancelled" or "completed".
    pub fn status(&self) -> &'static str {
        if !self.failed().is_empty() {
            "failed"
        } else if self.was_cancelled() {
            "cancelled"
        } else {
            "completed"
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::verify;

    fn report(statuses: &[(Dataset, DatasetStatus)]) -> MigrationReport {
        let now = Utc::now();
        MigrationReport {
            run_id: "run".into(),
            workspace: "default".into(),
            graph_name: "chunk_entity_relation".into(),
            config_hash: "abc".into(),
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            datasets: statuses
                .iter()
                .map(|(d, s)| DatasetSummary::new(*d, "public.t").with_status(*s, None))
                .collect(),
        }
    }

    #[test]
    fn test_warnings_capped() {
        let mut summary = DatasetSummary::new(Dataset::LlmCache, "public.LIGHTRAG_LLM_CACHE");
        let warnings = (0..250)
            .map(|i| RecordWarning::Coercion {
                key: format!("k{}", i),
                reason: "not an object".into(),
            })
            .collect();
        summary.set_warnings(warnings);
        assert_eq!(summary.warnings.len(), MAX_REPORTED_WARNINGS);
    }

    #[test]
    fn test_overall_status() {
        let ok = report(&[
            (Dataset::GraphVertices, DatasetStatus::Completed),
            (Dataset::FullDocs, DatasetStatus::Missing),
        ]);
        assert_eq!(ok.status(), "completed");
        assert!(ok.failed().is_empty());

        let blocked = report(&[
            (Dataset::GraphVertices, DatasetStatus::Failed),
            (Dataset::GraphEdges, DatasetStatus::Blocked),
        ]);
        assert_eq!(blocked.status(), "failed");
        assert_eq!(
            blocked.failed(),
            vec![Dataset::GraphVertices, Dataset::GraphEdges]
        );

        let cancelled = report(&[(Dataset::TextChunks, DatasetStatus::Cancelled)]);
        assert_eq!(cancelled.status(), "cancelled");
    }

    #[test]
    fn test_summary_json_shape() {
        let mut summary = DatasetSummary::new(Dataset::GraphEdges, "chunk_entity_relation.DIRECTED");
        summary.source_count = 3;
        summary.migrated_count = 2;
        summary.skipped_count = 1;
        summary.verification = Some(verify(3, 2, 0.5));
        let json: serde_json::Value =
            serde_json::from_str(&report(&[]).to_json().unwrap()).unwrap();
        assert!(json["datasets"].as_array().unwrap().is_empty());

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["dataset"], "graph_edges");
        assert_eq!(value["status"], "completed");
        assert_eq!(value["skipped_count"], 1);
        assert_eq!(value["verification"]["verdict"], "pass");
        assert!(value.get("error").is_none());
    }
}
