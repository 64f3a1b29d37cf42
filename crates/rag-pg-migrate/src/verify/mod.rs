//! Count-based completeness check.
//!
//! A data set passes when the target holds at least `tolerance` times as many
//! rows as the source produced. The verdict is advisory: it never fails a
//! run, it only shows up in the report.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::TableSpec;
use crate::error::Result;
use crate::target::TargetStore;

/// Outcome of a completeness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Incomplete,
}

/// A verdict with the numbers behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub verdict: Verdict,
    pub source_count: u64,
    pub target_count: u64,
    pub tolerance: f64,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Target rows as a fraction of source rows (1.0 for an empty source).
    pub fn ratio(&self) -> f64 {
        if self.source_count == 0 {
            1.0
        } else {
            self.target_count as f64 / self.source_count as f64
        }
    }
}

/// Compare counts. Passes iff `target_count >= source_count * tolerance`.
///
/// The source count comes first: 950 target rows against 1000 source rows at
/// 0.95 is `verify(1000, 950, 0.95)` and passes, while `verify(1000, 940, 0.95)`
/// is incomplete. Swapping the arguments turns a short target into a pass.
pub fn verify(source_count: u64, target_count: u64, tolerance: f64) -> Verification {
    let required = source_count as f64 * tolerance;
    let verdict = if target_count as f64 >= required {
        Verdict::Pass
    } else {
        Verdict::Incomplete
    };
    Verification {
        verdict,
        source_count,
        target_count,
        tolerance,
    }
}

/// Count the target rows of `table` for `workspace` and verify them.
pub async fn verify_table(
    store: &dyn TargetStore,
    table: &TableSpec,
    workspace: &str,
    source_count: u64,
    tolerance: f64,
) -> Result<Verification> {
    let target_count = store.count_rows(table, workspace).await?;
    let result = verify(source_count, target_count, tolerance);
    match result.verdict {
        Verdict::Pass => info!(
            "{}: verified {} of {} rows",
            table.full_name(),
            target_count,
            source_count
        ),
        Verdict::Incomplete => warn!(
            "{}: verification incomplete: {} of {} rows ({:.1}%, tolerance {:.1}%)",
            table.full_name(),
            target_count,
            source_count,
            result.ratio() * 100.0,
            tolerance * 100.0
        ),
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MemoryStore;

    #[test]
    fn test_within_tolerance_passes() {
        assert_eq!(verify(1000, 950, 0.95).verdict, Verdict::Pass);
        assert_eq!(verify(1000, 1000, 1.0).verdict, Verdict::Pass);
        assert_eq!(verify(1000, 1200, 0.95).verdict, Verdict::Pass);
    }

    #[test]
    fn test_below_tolerance_is_incomplete() {
        let v = verify(1000, 940, 0.95);
        assert_eq!(v.verdict, Verdict::Incomplete);
        assert!(!v.passed());
        assert_eq!(verify(1000, 999, 1.0).verdict, Verdict::Incomplete);
    }

    #[test]
    fn test_argument_order_is_source_then_target() {
        let v = verify(1000, 940, 0.95);
        assert_eq!(v.source_count, 1000);
        assert_eq!(v.target_count, 940);
        assert_eq!(v.verdict, Verdict::Incomplete);

        // Swapped, the short side looks like surplus target rows.
        assert_eq!(verify(940, 1000, 0.95).verdict, Verdict::Pass);
    }

    #[test]
    fn test_empty_source_passes() {
        let v = verify(0, 0, 1.0);
        assert!(v.passed());
        assert_eq!(v.ratio(), 1.0);
    }

    #[tokio::test]
    async fn test_verify_table_counts_target() {
        let store = MemoryStore::new();
        let table = TableSpec::text_chunks("public");
        let v = verify_table(&store, &table, "default", 3, 1.0).await.unwrap();
        assert_eq!(v.target_count, 0);
        assert_eq!(v.verdict, Verdict::Incomplete);
    }
}
