//! # rag-pg-migrate
//!
//! Batch migration of a RAG knowledge store into PostgreSQL with Apache AGE.
//!
//! The library moves two kinds of exported data:
//!
//! - **Knowledge graph** (GraphML or node-link JSON) into AGE vertex and edge
//!   label tables, with packed `graphid` identifiers
//! - **Key-value stores** (full documents, document status, text chunks, LLM
//!   response cache) into workspace-scoped relational tables
//!
//! Every write is an idempotent upsert, so an interrupted run can simply be
//! started again. Data sets already complete in the target are skipped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rag_pg_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> rag_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run(None).await?;
//!     println!("Migrated {} rows", report.rows_migrated());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod mapper;
pub mod orchestrator;
pub mod source;
pub mod target;
pub mod transfer;
pub mod verify;

// Re-exports for convenient access
pub use config::{Config, DatasetKind, MigrationConfig, SourcesConfig, TargetConfig};
pub use error::{MigrateError, RecordWarning, Result};
pub use orchestrator::{
    Dataset, DatasetCheck, DatasetStatus, DatasetSummary, HealthCheckResult, MigrationReport,
    Orchestrator,
};
pub use target::{MemoryStore, PgStore, SslMode, TargetStore};
pub use transfer::{BatchLoader, BatchProgress, LoadStats};
pub use verify::{verify, Verdict, Verification};
