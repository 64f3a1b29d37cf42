//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA256 of the configuration, recorded in the run report so two
    /// reports can be tied to the same settings.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::SslMode;
    use std::io::Write;

    const MINIMAL: &str = r#"
target:
  host: localhost
  database: rag
  user: postgres
  password: secret
"#;

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.target.ssl_mode, SslMode::Require);
        assert_eq!(config.migration.workspace, "default");
        assert_eq!(config.migration.graph_name, "chunk_entity_relation");
        assert_eq!(config.migration.vertex_label, "base");
        assert_eq!(config.migration.edge_label, "DIRECTED");
        assert_eq!(config.migration.datasets, DatasetKind::ALL.to_vec());
        assert_eq!(config.migration.batch_sizes.vertices, 500);
        assert_eq!(config.migration.batch_sizes.edges, 1000);
        assert!(config.migration.skip_completed);
        assert!(!config.migration.parallel_datasets);
        assert_eq!(config.migration.tolerances.for_kind(DatasetKind::FullDocs), 0.95);
        assert_eq!(config.migration.tolerances.for_kind(DatasetKind::TextChunks), 1.0);
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
target:
  host: db.internal
  port: 5433
  database: rag
  user: loader
  schema: rag
  ssl_mode: disable
sources:
  input_dir: /data/export
  graph_file: graph.json
migration:
  workspace: tenant_a
  datasets: [graph, llm_cache]
  batch_sizes:
    vertices: 250
  tolerances:
    default: 0.9
    edges: 0.99
  skip_completed: false
  parallel_datasets: true
  max_in_flight_batches: 2
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.target.ssl_mode, SslMode::Disable);
        assert_eq!(config.target.schema, "rag");
        assert_eq!(
            config.sources.path_for(DatasetKind::Graph),
            Path::new("/data/export/graph.json")
        );
        assert_eq!(
            config.sources.path_for(DatasetKind::LlmCache),
            Path::new("/data/export/kv_store_llm_response_cache.json")
        );
        assert_eq!(
            config.migration.datasets,
            vec![DatasetKind::Graph, DatasetKind::LlmCache]
        );
        assert_eq!(config.migration.batch_sizes.vertices, 250);
        assert_eq!(config.migration.batch_sizes.edges, 1000);
        assert_eq!(config.migration.tolerances.edges(), 0.99);
        assert_eq!(config.migration.tolerances.vertices(), 0.9);
        assert_eq!(config.migration.get_max_in_flight_batches(), 2);
        assert!(!config.migration.skip_completed);
    }

    #[test]
    fn test_unknown_dataset_rejected() {
        let yaml = format!("{}migration:\n  datasets: [graph, vectors]\n", MINIMAL);
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.target.database, "rag");
    }

    #[test]
    fn test_hash_tracks_changes() {
        let a = Config::from_yaml(MINIMAL).unwrap();
        let mut b = a.clone();
        assert_eq!(a.hash(), b.hash());
        b.migration.workspace = "other".into();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_auto_tuning_keeps_explicit_values() {
        let resources = SystemResources {
            total_memory_gb: 16.0,
            cpu_cores: 16,
        };
        let mut migration = MigrationConfig::default();
        migration.max_pg_connections = Some(3);
        let tuned = migration.with_auto_tuning(&resources);
        assert_eq!(tuned.max_in_flight_batches, Some(8));
        assert_eq!(tuned.max_pg_connections, Some(3));
    }
}
