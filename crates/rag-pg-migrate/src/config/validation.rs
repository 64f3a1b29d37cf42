//! Configuration validation.

use std::collections::HashSet;

use super::Config;
use crate::core::identifier::{validate_age_name, validate_identifier};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    identifier("target.schema", &config.target.schema)?;

    let migration = &config.migration;
    if migration.workspace.trim().is_empty() {
        return Err(MigrateError::Config(
            "migration.workspace must not be empty".into(),
        ));
    }
    age_name("migration.graph_name", &migration.graph_name, true)?;
    age_name("migration.vertex_label", &migration.vertex_label, false)?;
    age_name("migration.edge_label", &migration.edge_label, false)?;
    if migration.vertex_label == migration.edge_label {
        return Err(MigrateError::Config(
            "migration.vertex_label and migration.edge_label must differ".into(),
        ));
    }

    if migration.datasets.is_empty() {
        return Err(MigrateError::Config(
            "migration.datasets must name at least one data set".into(),
        ));
    }
    let mut seen = HashSet::new();
    for kind in &migration.datasets {
        if !seen.insert(kind) {
            return Err(MigrateError::Config(format!(
                "migration.datasets lists '{}' more than once",
                kind
            )));
        }
    }

    for (name, size) in migration.batch_sizes.all() {
        if size == 0 {
            return Err(MigrateError::Config(format!(
                "migration.batch_sizes.{} must be at least 1",
                name
            )));
        }
    }

    for (name, tolerance) in migration.tolerances.all() {
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(MigrateError::Config(format!(
                "migration.tolerances.{} must be between 0 and 1, got {}",
                name, tolerance
            )));
        }
    }

    // Only check if explicitly set
    if let Some(0) = migration.max_in_flight_batches {
        return Err(MigrateError::Config(
            "migration.max_in_flight_batches must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.max_pg_connections {
        return Err(MigrateError::Config(
            "migration.max_pg_connections must be at least 1".into(),
        ));
    }

    Ok(())
}

fn identifier(field: &str, value: &str) -> Result<()> {
    validate_identifier(value).map_err(|e| with_field(field, e))
}

fn age_name(field: &str, value: &str, is_graph: bool) -> Result<()> {
    validate_age_name(value, is_graph).map_err(|e| with_field(field, e))
}

fn with_field(field: &str, e: MigrateError) -> MigrateError {
    match e {
        MigrateError::Config(message) => MigrateError::Config(format!("{}: {}", field, message)),
        other => other,
    }
}
