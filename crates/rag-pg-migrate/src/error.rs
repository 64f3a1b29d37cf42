//! Error types for the migration library.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source file could not be parsed.
    #[error("Malformed source file {}: {message} (at {position})", .path.display())]
    SourceFormat {
        path: PathBuf,
        position: String,
        message: String,
    },

    /// A value does not fit the packed identifier layout.
    #[error("{what} {value} out of range (must fit in {bits} bits)")]
    OutOfRange {
        what: &'static str,
        value: u64,
        bits: u32,
    },

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Store(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A data set could not be migrated.
    #[error("Migration failed for data set {dataset}: {message}")]
    Dataset { dataset: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Dataset error
    pub fn dataset(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Dataset {
            dataset: dataset.into(),
            message: message.into(),
        }
    }

    /// Create a SourceFormat error for a file.
    pub fn source_format(
        path: &Path,
        position: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        MigrateError::SourceFormat {
            path: path.to_path_buf(),
            position: position.into(),
            message: message.into(),
        }
    }

    /// Whether the error came from the target store connection.
    pub fn is_store_error(&self) -> bool {
        matches!(self, MigrateError::Store(_) | MigrateError::Pool { .. })
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::SourceFormat { .. } => 3,
            MigrateError::Store(_) | MigrateError::Pool { .. } => 4,
            MigrateError::Dataset { .. } => 5,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// A non-fatal problem with a single source record.
///
/// Warnings never abort a batch. They are counted per data set and a sample
/// is kept in the run report.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordWarning {
    /// The record had to be mapped to a degenerate row.
    Coercion { key: String, reason: String },

    /// An edge referenced a node that is not in the vertex map.
    EndpointMissing {
        source: String,
        target: String,
        missing: String,
    },
}

impl std::fmt::Display for RecordWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordWarning::Coercion { key, reason } => {
                write!(f, "record '{}' coerced: {}", key, reason)
            }
            RecordWarning::EndpointMissing {
                source,
                target,
                missing,
            } => write!(
                f,
                "edge '{}' -> '{}' skipped: endpoint '{}' not found",
                source, target, missing
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_format_names_file_and_position() {
        let err = MigrateError::source_format(
            Path::new("/data/kv_store_full_docs.json"),
            "line 3 column 7",
            "expected value",
        );
        let msg = err.to_string();
        assert!(msg.contains("kv_store_full_docs.json"));
        assert!(msg.contains("line 3 column 7"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_store_errors_are_classified() {
        assert!(MigrateError::pool("timed out", "getting connection").is_store_error());
        assert!(!MigrateError::Cancelled.is_store_error());
        assert_eq!(MigrateError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_format_detailed_includes_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = MigrateError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error: missing"));
    }

    #[test]
    fn test_record_warning_display() {
        let w = RecordWarning::EndpointMissing {
            source: "A".into(),
            target: "B".into(),
            missing: "B".into(),
        };
        assert_eq!(w.to_string(), "edge 'A' -> 'B' skipped: endpoint 'B' not found");
    }
}
