// azmigrate/src/verify/mod.rs
pub(crate) mod fingerprints;

pub use fingerprints::{BlobFingerprinter, PostgresFingerprinter, RegistryFingerprinter};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ResourceEndpoint;
use crate::diff::TimeWindow;
use crate::errors::Result;
use crate::model::{Freshness, MigrationUnit};

const MAX_DETAIL_ITEMS: usize = 5;

/// Comparable summary of one collection on one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fingerprint {
    Absent,
    RowCounts { tables: BTreeMap<String, u64> },
    BlobStats { count: u64, bytes: u64 },
    Tags { tags: BTreeMap<String, Option<DateTime<Utc>>> },
}

/// Reads a fingerprint for one verification unit. Must never mutate anything.
#[async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint(&self, endpoint: &ResourceEndpoint, unit: &MigrationUnit) -> Result<Fingerprint>;
}

#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub unit: String,
    pub matched: bool,
    pub detail: String,
}

/// Post-transfer reconciliation of source against target.
pub struct Verifier {
    fingerprinter: Arc<dyn Fingerprinter>,
    window: TimeWindow,
    reference_time: DateTime<Utc>,
}

impl Verifier {
    pub fn new(fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        Self {
            fingerprinter,
            window: TimeWindow::Unbounded,
            reference_time: Utc::now(),
        }
    }

    /// Only source tags inside `window` are required on the target.
    pub fn with_window(mut self, window: TimeWindow, reference_time: DateTime<Utc>) -> Self {
        self.window = window;
        self.reference_time = reference_time;
        self
    }

    pub async fn reconcile(
        &self,
        source: &ResourceEndpoint,
        target: &ResourceEndpoint,
        units: &[MigrationUnit],
    ) -> Vec<Reconciliation> {
        let mut findings = Vec::with_capacity(units.len());
        for unit in units {
            let identity = unit.identity();
            let finding = match (
                self.fingerprinter.fingerprint(source, unit).await,
                self.fingerprinter.fingerprint(target, unit).await,
            ) {
                (Ok(s), Ok(t)) => {
                    let (matched, detail) = compare(&s, &t, self.window, self.reference_time);
                    Reconciliation {
                        unit: identity,
                        matched,
                        detail,
                    }
                }
                (Err(e), _) => Reconciliation {
                    unit: identity,
                    matched: false,
                    detail: format!("source unreadable: {}", e),
                },
                (_, Err(e)) => Reconciliation {
                    unit: identity,
                    matched: false,
                    detail: format!("target unreadable: {}", e),
                },
            };
            if finding.matched {
                info!(unit = %finding.unit, detail = %finding.detail, "✓ verified");
            } else {
                warn!(unit = %finding.unit, detail = %finding.detail, "verification mismatch");
            }
            findings.push(finding);
        }
        findings
    }
}

/// Decides whether two fingerprints agree and describes the difference.
pub fn compare(
    source: &Fingerprint,
    target: &Fingerprint,
    window: TimeWindow,
    reference: DateTime<Utc>,
) -> (bool, String) {
    match (source, target) {
        (Fingerprint::Absent, _) => (false, "not found on source".to_string()),
        (Fingerprint::Tags { tags: s }, Fingerprint::Tags { tags: t }) => {
            compare_tags(s, Some(t), window, reference)
        }
        // A repository with nothing inside the window has nothing to copy.
        (Fingerprint::Tags { tags: s }, Fingerprint::Absent) => compare_tags(s, None, window, reference),
        (_, Fingerprint::Absent) => (false, "not found on target".to_string()),
        (Fingerprint::RowCounts { tables: s }, Fingerprint::RowCounts { tables: t }) => {
            let mut diffs = Vec::new();
            for (table, count) in s {
                match t.get(table) {
                    None => diffs.push(format!("{} missing on target", table)),
                    Some(other) if other != count => {
                        diffs.push(format!("{}: {} vs {} rows", table, count, other))
                    }
                    _ => {}
                }
            }
            for table in t.keys().filter(|k| !s.contains_key(*k)) {
                diffs.push(format!("{} only on target", table));
            }
            if diffs.is_empty() {
                let rows: u64 = s.values().sum();
                (true, format!("{} tables, {} rows", s.len(), rows))
            } else {
                (false, summarize(&diffs))
            }
        }
        (
            Fingerprint::BlobStats { count: sc, bytes: sb },
            Fingerprint::BlobStats { count: tc, bytes: tb },
        ) => {
            if sc == tc && sb == tb {
                (true, format!("{} blobs, {} bytes", sc, sb))
            } else {
                (
                    false,
                    format!("source {} blobs/{} bytes, target {} blobs/{} bytes", sc, sb, tc, tb),
                )
            }
        }
        _ => (false, "fingerprints are not comparable".to_string()),
    }
}

fn compare_tags(
    source: &BTreeMap<String, Option<DateTime<Utc>>>,
    target: Option<&BTreeMap<String, Option<DateTime<Utc>>>>,
    window: TimeWindow,
    reference: DateTime<Utc>,
) -> (bool, String) {
    let required: Vec<&String> = source
        .iter()
        .filter(|(_, ts)| window.contains(ts.map(Freshness::Timestamp).as_ref(), reference))
        .map(|(tag, _)| tag)
        .collect();
    let Some(target) = target else {
        return if required.is_empty() {
            (true, format!("no tags inside the window, {} older", source.len()))
        } else {
            (false, "not found on target".to_string())
        };
    };
    let missing: Vec<String> = required
        .iter()
        .filter(|tag| !target.contains_key(tag.as_str()))
        .map(|tag| tag.to_string())
        .collect();
    if missing.is_empty() {
        (true, format!("{} of {} tags present", required.len(), source.len()))
    } else {
        (false, format!("missing tags: {}", summarize(&missing)))
    }
}

fn summarize(items: &[String]) -> String {
    let shown = items
        .iter()
        .take(MAX_DETAIL_ITEMS)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if items.len() > MAX_DETAIL_ITEMS {
        format!("{} (+{} more)", shown, items.len() - MAX_DETAIL_ITEMS)
    } else {
        shown
    }
}
