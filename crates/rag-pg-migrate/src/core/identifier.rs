//! Identifier validation and quoting for dynamically built SQL.
//!
//! Table, schema, graph and label names are configuration values and cannot
//! be bound as statement parameters, so every one of them goes through
//! [`quote_pg`] or [`quote_literal`] before it reaches a SQL string.

use crate::error::{MigrateError, Result};

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers PostgreSQL would silently truncate.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Shortest graph name `create_graph` accepts.
const MIN_GRAPH_NAME_LENGTH: usize = 3;

/// Validate a graph or label name the way AGE's catalog functions do.
///
/// The name must start with a letter or `_` and continue with letters,
/// digits or `_`. Graph names need at least three characters.
pub fn validate_age_name(name: &str, is_graph: bool) -> Result<()> {
    validate_identifier(name)?;

    let mut chars = name.chars();
    let leading_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !leading_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(MigrateError::Config(format!(
            "{:?} is not a valid graph or label name: use a letter or '_' followed by letters, digits or '_'",
            name
        )));
    }

    if is_graph && name.len() < MIN_GRAPH_NAME_LENGTH {
        return Err(MigrateError::Config(format!(
            "Graph name must be at least {} characters: {:?}",
            MIN_GRAPH_NAME_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Quote a validated identifier as a string literal.
///
/// AGE catalog functions (`create_graph`, `create_vlabel`, ...) take names as
/// `cstring` arguments, which cannot be bound as parameters.
pub fn quote_literal(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("'{}'", name.replace('\'', "''")))
}
