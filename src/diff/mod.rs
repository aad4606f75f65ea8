// azmigrate/src/diff/mod.rs
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::model::{Freshness, MigrationUnit, PlannedUnit, SelectionReason, TransferPlan};

/// Which source units are considered at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Unbounded,
    /// Only units whose timestamp is no older than `n` days before the reference time.
    LastDays(u32),
}

impl TimeWindow {
    /// Bounded windows exclude units that carry no timestamp.
    pub fn contains(&self, marker: Option<&Freshness>, reference: DateTime<Utc>) -> bool {
        match self {
            TimeWindow::Unbounded => true,
            TimeWindow::LastDays(days) => {
                let cutoff = reference - Duration::days(i64::from(*days));
                marker
                    .and_then(Freshness::timestamp)
                    .is_some_and(|ts| ts >= cutoff)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiffPolicy {
    pub window: TimeWindow,
    /// Select every in-window unit, even ones already up to date.
    pub force: bool,
    pub reference_time: DateTime<Utc>,
}

impl DiffPolicy {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            force: false,
            reference_time: Utc::now(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(TimeWindow::Unbounded)
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn in_window(&self, unit: &MigrationUnit) -> bool {
        self.window
            .contains(unit.freshness.as_ref(), self.reference_time)
    }
}

/// True when the target copy is strictly behind the source. Equal markers are up to date.
pub fn target_is_stale(source: &Freshness, target: &Freshness) -> bool {
    match (source, target) {
        (Freshness::Timestamp(s), Freshness::Timestamp(t)) => t < s,
        (Freshness::RowCount(s), Freshness::RowCount(t)) => t < s,
        (Freshness::Digest(s), Freshness::Digest(t)) => s != t,
        _ => false,
    }
}

/// Computes the units present in `source` but missing or stale in `target`.
///
/// Output keeps source enumeration order. Duplicate source identities keep their first occurrence.
pub fn plan(source: &[MigrationUnit], target: &[MigrationUnit], policy: &DiffPolicy) -> TransferPlan {
    let mut target_by_identity: HashMap<String, &MigrationUnit> = HashMap::new();
    for unit in target {
        target_by_identity.entry(unit.identity()).or_insert(unit);
    }

    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for unit in source {
        let identity = unit.identity();
        if !seen.insert(identity.clone()) {
            warn!(unit = %identity, "duplicate unit in source enumeration, ignoring");
            continue;
        }
        if !policy.in_window(unit) {
            debug!(unit = %identity, "outside time window");
            continue;
        }

        let reason = match target_by_identity.get(&identity) {
            None => Some(SelectionReason::Missing),
            Some(existing) => match (&unit.freshness, &existing.freshness) {
                (Some(s), Some(t)) if target_is_stale(s, t) => Some(SelectionReason::Stale),
                _ if policy.force => Some(SelectionReason::Forced),
                _ => None,
            },
        };

        if let Some(reason) = reason {
            entries.push(PlannedUnit {
                unit: unit.clone(),
                reason,
            });
        }
    }

    TransferPlan::new(entries)
}
