// azmigrate/src/model/report.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::SelectionReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Succeeded => write!(f, "succeeded"),
            TransferStatus::Failed => write!(f, "failed"),
            TransferStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of one unit's transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferResult {
    pub unit: String,
    pub reason: SelectionReason,
    pub status: TransferStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl TransferResult {
    pub fn succeeded(unit: String, reason: SelectionReason, attempts: u32, duration: Duration) -> Self {
        Self {
            unit,
            reason,
            status: TransferStatus::Succeeded,
            attempts,
            duration_ms: duration.as_millis() as u64,
            error: None,
        }
    }

    pub fn failed(
        unit: String,
        reason: SelectionReason,
        attempts: u32,
        duration: Duration,
        error: String,
    ) -> Self {
        Self {
            unit,
            reason,
            status: TransferStatus::Failed,
            attempts,
            duration_ms: duration.as_millis() as u64,
            error: Some(error),
        }
    }

    pub fn skipped(unit: String, reason: SelectionReason, detail: &str) -> Self {
        Self {
            unit,
            reason,
            status: TransferStatus::Skipped,
            attempts: 0,
            duration_ms: 0,
            error: Some(detail.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Aggregate outcome of a transfer batch. Only the scheduler's aggregation path records into it.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: ReportCounts,
    pub results: Vec<TransferResult>,
    pub cancelled: bool,
}

impl MigrationReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            counts: ReportCounts::default(),
            results: Vec::new(),
            cancelled: false,
        }
    }

    pub(crate) fn record(&mut self, result: TransferResult) {
        self.counts.total += 1;
        match result.status {
            TransferStatus::Succeeded => self.counts.succeeded += 1,
            TransferStatus::Failed => self.counts.failed += 1,
            TransferStatus::Skipped => self.counts.skipped += 1,
        }
        self.results.push(result);
    }

    pub(crate) fn finish(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.counts.failed == 0 && !self.cancelled
    }
}

impl Default for MigrationReport {
    fn default() -> Self {
        Self::new()
    }
}
