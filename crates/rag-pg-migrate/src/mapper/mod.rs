//! Record mappers: source records to target rows.
//!
//! Mapping is pure and total. A record that cannot be mapped faithfully still
//! produces a row, and the compromise is written to the [`MappingLog`].

mod coerce;
mod graph;
mod kv;

pub use coerce::{
    epoch_to_timestamp, truncate_chars, MAX_CACHE_TYPE_CHARS, MAX_NAME_CHARS, MAX_REF_CHARS,
    MAX_STATUS_CHARS,
};
pub use graph::{map_edges, map_vertex, EdgeRow, VertexRow, ENTITY_ID_KEY};
pub use kv::{
    map_cache_entry, map_chunk, map_doc_status, map_document, CacheRow, ChunkRow, DocStatusRow,
    DocumentRow, DEFAULT_CACHE_TYPE, DEFAULT_STATUS,
};

use tracing::warn;

use crate::core::Row;
use crate::error::RecordWarning;

/// A mapped row ready for the batch loader.
pub trait TargetRow {
    /// Column values in table column order.
    fn into_values(self) -> Row;
}

/// Warnings collected while mapping one data set.
#[derive(Debug, Default, Clone)]
pub struct MappingLog {
    warnings: Vec<RecordWarning>,
    coerced: u64,
    skipped: u64,
}

impl MappingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a degenerate mapping.
    pub fn coerced(&mut self, key: &str, reason: impl Into<String>) {
        let warning = RecordWarning::Coercion {
            key: key.to_string(),
            reason: reason.into(),
        };
        warn!("{}", warning);
        self.coerced += 1;
        self.warnings.push(warning);
    }

    /// Record an edge dropped for a missing endpoint.
    pub fn endpoint_missing(&mut self, source: &str, target: &str, missing: &str) {
        let warning = RecordWarning::EndpointMissing {
            source: source.to_string(),
            target: target.to_string(),
            missing: missing.to_string(),
        };
        warn!("{}", warning);
        self.skipped += 1;
        self.warnings.push(warning);
    }

    /// Cut `value` to `max` characters, recording a coercion when it was longer.
    pub fn fit_width(&mut self, key: &str, field: &str, value: String, max: usize) -> String {
        let cut = truncate_chars(&value, max);
        if cut.len() < value.len() {
            self.coerced(
                key,
                format!(
                    "field '{}' truncated from {} to {} characters",
                    field,
                    value.chars().count(),
                    max
                ),
            );
        }
        cut
    }

    pub fn coerced_count(&self) -> u64 {
        self.coerced
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped
    }

    pub fn warnings(&self) -> &[RecordWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<RecordWarning> {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_log_counts() {
        let mut log = MappingLog::new();
        log.coerced("k1", "not an object");
        log.endpoint_missing("A", "Z", "Z");
        log.endpoint_missing("Y", "A", "Y");
        assert_eq!(log.coerced_count(), 1);
        assert_eq!(log.skipped_count(), 2);
        assert_eq!(log.warnings().len(), 3);
    }
}
