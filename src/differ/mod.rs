//! Change predicate over normalized text. Knows nothing about markup.

mod summary;

pub use summary::ChangeSummary;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{NormalizedText, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffVerdict {
    /// First snapshot ever; nothing to compare against.
    Baseline,
    Unchanged,
    Changed,
}

impl DiffVerdict {
    pub fn key(&self) -> &'static str {
        match self {
            DiffVerdict::Baseline => "baseline",
            DiffVerdict::Unchanged => "unchanged",
            DiffVerdict::Changed => "changed",
        }
    }
}

impl fmt::Display for DiffVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Whole-text equality is the change predicate.
pub fn compare(previous: Option<&NormalizedText>, current: &NormalizedText) -> DiffVerdict {
    match previous {
        None => DiffVerdict::Baseline,
        Some(previous) if previous == current => DiffVerdict::Unchanged,
        Some(_) => DiffVerdict::Changed,
    }
}

/// Same verdict as [`compare`], short-circuiting on differing fingerprints.
pub fn compare_snapshots(previous: Option<&Snapshot>, current: &Snapshot) -> DiffVerdict {
    match previous {
        Some(previous) if previous.fingerprint() != current.fingerprint() => DiffVerdict::Changed,
        _ => compare(previous.map(Snapshot::text), current.text()),
    }
}
