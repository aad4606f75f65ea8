// azmigrate/src/model/plan.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::MigrationUnit;

/// Why the diff engine selected a unit for transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionReason {
    Missing,
    Stale,
    Forced,
}

impl fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionReason::Missing => write!(f, "missing"),
            SelectionReason::Stale => write!(f, "stale"),
            SelectionReason::Forced => write!(f, "forced"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedUnit {
    pub unit: MigrationUnit,
    pub reason: SelectionReason,
}

/// Ordered, immutable list of units selected for transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferPlan {
    entries: Vec<PlannedUnit>,
    created_at: DateTime<Utc>,
}

impl TransferPlan {
    pub(crate) fn new(entries: Vec<PlannedUnit>) -> Self {
        Self {
            entries,
            created_at: Utc::now(),
        }
    }

    pub fn entries(&self) -> &[PlannedUnit] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, reason: SelectionReason) -> usize {
        self.entries.iter().filter(|e| e.reason == reason).count()
    }

    pub fn identities(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.unit.identity()).collect()
    }
}
