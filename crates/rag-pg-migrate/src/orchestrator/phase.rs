//! Per-data-set phase tracking.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrateError, Result};

/// Stages a data set moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    Reading,
    Mapping,
    Loading,
    Verifying,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::NotStarted => "not started",
            Phase::Reading => "reading",
            Phase::Mapping => "mapping",
            Phase::Loading => "loading",
            Phase::Verifying => "verifying",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Current phase of one data set. Only moves forward.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    dataset: String,
    phase: Phase,
}

impl PhaseTracker {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            phase: Phase::NotStarted,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next`. Phases may be skipped but never repeated or reversed.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if next <= self.phase {
            return Err(MigrateError::dataset(
                self.dataset.clone(),
                format!("cannot move from phase '{}' to '{}'", self.phase, next),
            ));
        }
        debug!("{}: {} -> {}", self.dataset, self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Jump to [`Phase::Done`] from wherever the data set is.
    pub fn finish(&mut self) {
        if self.phase != Phase::Done {
            debug!("{}: {} -> {}", self.dataset, self.phase, Phase::Done);
            self.phase = Phase::Done;
        }
    }
}
