//! Configuration type definitions with auto-tuning based on system resources.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::target::SslMode;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        Self {
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            cpu_cores: sys.cpus().len().max(1),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target database (PostgreSQL with Apache AGE).
    pub target: TargetConfig,

    /// Location of the exported source files.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema for the relational tables (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: require).
    #[serde(default)]
    pub ssl_mode: SslMode,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// A selectable group of source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Knowledge graph: vertices, then edges.
    Graph,
    FullDocs,
    DocStatus,
    TextChunks,
    LlmCache,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 5] = [
        DatasetKind::Graph,
        DatasetKind::FullDocs,
        DatasetKind::DocStatus,
        DatasetKind::TextChunks,
        DatasetKind::LlmCache,
    ];

    /// File name looked up in `sources.input_dir` when no path is configured.
    pub fn default_file_name(self) -> &'static str {
        match self {
            DatasetKind::Graph => "graph_chunk_entity_relation.graphml",
            DatasetKind::FullDocs => "kv_store_full_docs.json",
            DatasetKind::DocStatus => "kv_store_doc_status.json",
            DatasetKind::TextChunks => "kv_store_text_chunks.json",
            DatasetKind::LlmCache => "kv_store_llm_response_cache.json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKind::Graph => "graph",
            DatasetKind::FullDocs => "full_docs",
            DatasetKind::DocStatus => "doc_status",
            DatasetKind::TextChunks => "text_chunks",
            DatasetKind::LlmCache => "llm_cache",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DatasetKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown data set '{}' (expected one of: graph, full_docs, doc_status, text_chunks, llm_cache)",
                    s
                )
            })
    }
}

/// Source file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Directory holding the exported files (default: "./rag_storage").
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Graph file (GraphML, or node-link JSON when it ends in `.json`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_docs_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_status_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_chunks_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_cache_file: Option<PathBuf>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            graph_file: None,
            full_docs_file: None,
            doc_status_file: None,
            text_chunks_file: None,
            llm_cache_file: None,
        }
    }
}

impl SourcesConfig {
    /// Path of the file for a data set. Relative overrides resolve against
    /// `input_dir`.
    pub fn path_for(&self, kind: DatasetKind) -> PathBuf {
        let explicit = match kind {
            DatasetKind::Graph => &self.graph_file,
            DatasetKind::FullDocs => &self.full_docs_file,
            DatasetKind::DocStatus => &self.doc_status_file,
            DatasetKind::TextChunks => &self.text_chunks_file,
            DatasetKind::LlmCache => &self.llm_cache_file,
        };
        match explicit {
            Some(path) => self.input_dir.join(path),
            None => self.input_dir.join(kind.default_file_name()),
        }
    }
}

/// Rows per upsert batch, per target table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSizes {
    pub vertices: usize,
    pub edges: usize,
    pub full_docs: usize,
    pub doc_status: usize,
    pub text_chunks: usize,
    pub llm_cache: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            vertices: 500,
            edges: 1000,
            full_docs: 500,
            doc_status: 500,
            text_chunks: 500,
            llm_cache: 500,
        }
    }
}

impl BatchSizes {
    pub fn for_kind(&self, kind: DatasetKind) -> usize {
        match kind {
            DatasetKind::Graph => self.vertices,
            DatasetKind::FullDocs => self.full_docs,
            DatasetKind::DocStatus => self.doc_status,
            DatasetKind::TextChunks => self.text_chunks,
            DatasetKind::LlmCache => self.llm_cache,
        }
    }

    pub(crate) fn all(&self) -> [(&'static str, usize); 6] {
        [
            ("vertices", self.vertices),
            ("edges", self.edges),
            ("full_docs", self.full_docs),
            ("doc_status", self.doc_status),
            ("text_chunks", self.text_chunks),
            ("llm_cache", self.llm_cache),
        ]
    }
}

/// Verification tolerances: the fraction of source rows that must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tolerances {
    /// Used for every data set without its own value (default: 0.95).
    #[serde(default = "default_tolerance")]
    pub default: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertices: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_docs: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_status: Option<f64>,

    /// Chunks must match exactly unless configured otherwise.
    #[serde(default = "default_exact")]
    pub text_chunks: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_cache: Option<f64>,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            default: default_tolerance(),
            vertices: None,
            edges: None,
            full_docs: None,
            doc_status: None,
            text_chunks: default_exact(),
            llm_cache: None,
        }
    }
}

impl Tolerances {
    pub fn vertices(&self) -> f64 {
        self.vertices.unwrap_or(self.default)
    }

    pub fn edges(&self) -> f64 {
        self.edges.unwrap_or(self.default)
    }

    /// Tolerance for a key-value data set (vertices for `Graph`).
    pub fn for_kind(&self, kind: DatasetKind) -> f64 {
        let specific = match kind {
            DatasetKind::Graph => self.vertices,
            DatasetKind::FullDocs => self.full_docs,
            DatasetKind::DocStatus => self.doc_status,
            DatasetKind::TextChunks => self.text_chunks,
            DatasetKind::LlmCache => self.llm_cache,
        };
        specific.unwrap_or(self.default)
    }

    pub(crate) fn all(&self) -> Vec<(&'static str, f64)> {
        let mut all = vec![("default", self.default)];
        for (name, value) in [
            ("vertices", self.vertices),
            ("edges", self.edges),
            ("full_docs", self.full_docs),
            ("doc_status", self.doc_status),
            ("text_chunks", self.text_chunks),
            ("llm_cache", self.llm_cache),
        ] {
            if let Some(v) = value {
                all.push((name, v));
            }
        }
        all
    }
}

/// Migration behavior configuration.
/// Performance-related fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Workspace every relational row is written under (default: "default").
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// AGE graph name (default: "chunk_entity_relation").
    #[serde(default = "default_graph_name")]
    pub graph_name: String,

    /// Vertex label (default: "base").
    #[serde(default = "default_vertex_label")]
    pub vertex_label: String,

    /// Edge label (default: "DIRECTED").
    #[serde(default = "default_edge_label")]
    pub edge_label: String,

    /// Data sets to migrate (default: all).
    #[serde(default = "default_datasets")]
    pub datasets: Vec<DatasetKind>,

    #[serde(default)]
    pub batch_sizes: BatchSizes,

    #[serde(default)]
    pub tolerances: Tolerances,

    /// Skip a data set whose target already holds at least as many rows as
    /// the source (default: true).
    #[serde(default = "default_true")]
    pub skip_completed: bool,

    /// Run data sets concurrently (default: false).
    #[serde(default)]
    pub parallel_datasets: bool,

    /// Vertex batches in flight at once. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight_batches: Option<usize>,

    /// Maximum PostgreSQL connections. Auto-tuned if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pg_connections: Option<usize>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            graph_name: default_graph_name(),
            vertex_label: default_vertex_label(),
            edge_label: default_edge_label(),
            datasets: default_datasets(),
            batch_sizes: BatchSizes::default(),
            tolerances: Tolerances::default(),
            skip_completed: true,
            parallel_datasets: false,
            max_in_flight_batches: None,
            max_pg_connections: None,
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let cores = resources.cpu_cores;

        // Batches in flight: half the cores, 2-8
        let in_flight = *self
            .max_in_flight_batches
            .get_or_insert_with(|| (cores / 2).clamp(2, 8));

        // Connections: every in-flight batch holds one, plus one per
        // concurrently running data set for counts and DDL.
        let datasets = if self.parallel_datasets {
            self.datasets.len().max(1)
        } else {
            1
        };
        let conns = *self
            .max_pg_connections
            .get_or_insert_with(|| (in_flight + datasets).clamp(4, 32));

        info!(
            "Auto-tuned config: max_in_flight_batches={}, max_pg_connections={}",
            in_flight, conns
        );

        self
    }

    pub fn includes(&self, kind: DatasetKind) -> bool {
        self.datasets.contains(&kind)
    }

    pub fn get_max_in_flight_batches(&self) -> usize {
        self.max_in_flight_batches.unwrap_or(4)
    }

    pub fn get_max_pg_connections(&self) -> usize {
        self.max_pg_connections.unwrap_or(8)
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("./rag_storage")
}

fn default_workspace() -> String {
    "default".to_string()
}

fn default_graph_name() -> String {
    "chunk_entity_relation".to_string()
}

fn default_vertex_label() -> String {
    "base".to_string()
}

fn default_edge_label() -> String {
    "DIRECTED".to_string()
}

fn default_datasets() -> Vec<DatasetKind> {
    DatasetKind::ALL.to_vec()
}

fn default_tolerance() -> f64 {
    0.95
}

fn default_exact() -> Option<f64> {
    Some(1.0)
}

fn default_true() -> bool {
    true
}
