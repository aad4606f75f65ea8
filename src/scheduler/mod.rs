// azmigrate/src/scheduler/mod.rs
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::Result;
use crate::model::{MigrationReport, MigrationUnit, PlannedUnit, TransferPlan, TransferResult};

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Copies one unit from source to target. Implementations own all transport details.
#[async_trait]
pub trait TransferFunction: Send + Sync {
    async fn transfer(&self, unit: &MigrationUnit) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    /// Attempts per unit; 1 disables retries.
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

/// Runs a transfer plan on a bounded worker pool.
///
/// One failing unit never aborts the batch. Cancellation stops new units from starting;
/// units already in flight run to completion.
pub struct TransferScheduler {
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl TransferScheduler {
    pub fn new(config: SchedulerConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub async fn execute(&self, plan: &TransferPlan, transfer: Arc<dyn TransferFunction>) -> MigrationReport {
        let mut report = MigrationReport::new();
        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, TransferResult)>();
        let mut workers = JoinSet::new();
        let mut slots: Vec<Option<TransferResult>> = vec![None; plan.len()];
        let mut started = 0usize;
        let mut cancelled = false;

        info!(units = plan.len(), concurrency, "starting transfers");

        for (index, entry) in plan.entries().iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                cancelled = true;
                break;
            };
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            started += 1;
            let entry = entry.clone();
            let transfer = transfer.clone();
            let tx = tx.clone();
            let cancel = self.cancel.clone();
            let config = self.config.clone();
            workers.spawn(async move {
                let _permit = permit;
                let result = attempt_with_retries(entry, transfer, &config, &cancel).await;
                let _ = tx.send((index, result));
            });
        }
        drop(tx);

        if cancelled {
            warn!(
                started,
                remaining = plan.len() - started,
                "cancellation requested, waiting for in-flight transfers"
            );
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "transfer worker ended abnormally");
            }
        }
        while let Some((index, result)) = rx.recv().await {
            slots[index] = Some(result);
        }

        for (entry, slot) in plan.entries().iter().zip(slots) {
            let result = match slot {
                Some(result) => result,
                None if cancelled => {
                    TransferResult::skipped(entry.unit.identity(), entry.reason, "not started: run cancelled")
                }
                None => TransferResult::failed(
                    entry.unit.identity(),
                    entry.reason,
                    0,
                    Duration::ZERO,
                    "transfer worker ended without reporting".to_string(),
                ),
            };
            report.record(result);
        }
        report.finish(cancelled || self.cancel.is_cancelled());

        info!(
            succeeded = report.counts.succeeded,
            failed = report.counts.failed,
            skipped = report.counts.skipped,
            cancelled = report.cancelled,
            "transfers finished"
        );
        report
    }
}

async fn attempt_with_retries(
    entry: PlannedUnit,
    transfer: Arc<dyn TransferFunction>,
    config: &SchedulerConfig,
    cancel: &CancellationToken,
) -> TransferResult {
    let identity = entry.unit.identity();
    let max_attempts = config.max_attempts.max(1);
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match transfer.transfer(&entry.unit).await {
            Ok(()) => {
                info!(unit = %identity, attempt, "✓ transferred");
                return TransferResult::succeeded(identity, entry.reason, attempt, started.elapsed());
            }
            Err(e) if attempt >= max_attempts => {
                warn!(unit = %identity, attempt, error = %e, "transfer failed, giving up");
                return TransferResult::failed(identity, entry.reason, attempt, started.elapsed(), e.to_string());
            }
            Err(e) => {
                let delay = backoff_delay(config.backoff_base, attempt);
                warn!(unit = %identity, attempt, error = %e, retry_in = ?delay, "transfer failed, retrying");
                let interrupted = tokio::select! {
                    _ = cancel.cancelled() => true,
                    _ = tokio::time::sleep(delay) => false,
                };
                if interrupted {
                    return TransferResult::failed(
                        identity,
                        entry.reason,
                        attempt,
                        started.elapsed(),
                        format!("{} (retries abandoned: run cancelled)", e),
                    );
                }
            }
        }
    }
}

/// `base * 2^(attempt - 1)`, capped.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{plan, DiffPolicy};
    use crate::errors::MigrationError;
    use crate::model::TransferStatus;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake transfer with configurable failures and in-flight tracking.
    #[derive(Default)]
    struct FakeTransfer {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: Mutex<HashMap<String, u32>>,
        /// unit identity -> number of leading attempts that fail (u32::MAX = always)
        failures: HashMap<String, u32>,
        delay: Duration,
        cancel_on_first_call: Option<CancellationToken>,
    }

    #[async_trait]
    impl TransferFunction for FakeTransfer {
        async fn transfer(&self, unit: &MigrationUnit) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(token) = &self.cancel_on_first_call {
                token.cancel();
            }
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let identity = unit.identity();
            let attempt = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(identity.clone()).or_insert(0);
                *n += 1;
                *n
            };
            match self.failures.get(&identity) {
                Some(fail_first) if attempt <= *fail_first => Err(MigrationError::Transfer {
                    unit: identity,
                    reason: format!("attempt {} failed", attempt),
                }),
                _ => Ok(()),
            }
        }
    }

    fn databases(names: &[&str]) -> TransferPlan {
        let units: Vec<MigrationUnit> = names.iter().map(|n| MigrationUnit::database(*n)).collect();
        plan(&units, &[], &DiffPolicy::unbounded())
    }

    fn config(concurrency: usize, max_attempts: u32) -> SchedulerConfig {
        SchedulerConfig {
            concurrency,
            max_attempts,
            backoff_base: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let names: Vec<String> = (0..20).map(|i| format!("db{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let transfer = Arc::new(FakeTransfer {
            delay: Duration::from_millis(10),
            ..Default::default()
        });
        let scheduler = TransferScheduler::new(config(3, 1), CancellationToken::new());

        let report = scheduler.execute(&databases(&refs), transfer.clone()).await;
        assert_eq!(report.counts.succeeded, 20);
        assert!(transfer.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert!(transfer.max_in_flight.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_abort_batch() {
        let transfer = Arc::new(FakeTransfer {
            failures: HashMap::from([("db:b".to_string(), u32::MAX)]),
            ..Default::default()
        });
        let scheduler = TransferScheduler::new(config(2, 1), CancellationToken::new());
        let report = scheduler
            .execute(&databases(&["a", "b", "c", "d"]), transfer)
            .await;

        assert_eq!(report.counts.total, 4);
        assert_eq!(report.counts.succeeded, 3);
        assert_eq!(report.counts.failed, 1);
        let failed: Vec<_> = report
            .results
            .iter()
            .filter(|r| r.status == TransferStatus::Failed)
            .map(|r| r.unit.as_str())
            .collect();
        assert_eq!(failed, vec!["db:b"]);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_results_follow_plan_order() {
        let transfer = Arc::new(FakeTransfer::default());
        let scheduler = TransferScheduler::new(config(4, 1), CancellationToken::new());
        let report = scheduler
            .execute(&databases(&["z", "y", "x"]), transfer)
            .await;
        let order: Vec<_> = report.results.iter().map(|r| r.unit.as_str()).collect();
        assert_eq!(order, vec!["db:z", "db:y", "db:x"]);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let transfer = Arc::new(FakeTransfer {
            failures: HashMap::from([("db:a".to_string(), 2)]),
            ..Default::default()
        });
        let scheduler = TransferScheduler::new(config(1, 3), CancellationToken::new());
        let report = scheduler.execute(&databases(&["a"]), transfer.clone()).await;

        assert_eq!(report.counts.succeeded, 1);
        assert_eq!(report.results[0].attempts, 3);
        assert_eq!(transfer.calls.lock().unwrap()["db:a"], 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let transfer = Arc::new(FakeTransfer {
            failures: HashMap::from([("db:a".to_string(), u32::MAX)]),
            ..Default::default()
        });
        let scheduler = TransferScheduler::new(config(1, 2), CancellationToken::new());
        let report = scheduler.execute(&databases(&["a"]), transfer.clone()).await;

        assert_eq!(report.results[0].status, TransferStatus::Failed);
        assert_eq!(report.results[0].attempts, 2);
        assert_eq!(transfer.calls.lock().unwrap()["db:a"], 2);
    }

    #[tokio::test]
    async fn test_cancellation_lets_in_flight_finish_and_skips_rest() {
        let cancel = CancellationToken::new();
        let transfer = Arc::new(FakeTransfer {
            delay: Duration::from_millis(20),
            cancel_on_first_call: Some(cancel.clone()),
            ..Default::default()
        });
        let scheduler = TransferScheduler::new(config(1, 1), cancel);
        let report = scheduler
            .execute(&databases(&["a", "b", "c", "d"]), transfer.clone())
            .await;

        assert!(report.cancelled);
        assert_eq!(report.counts.succeeded, 1);
        assert_eq!(report.counts.skipped, 3);
        assert_eq!(report.results[0].unit, "db:a");
        assert_eq!(report.results[0].status, TransferStatus::Succeeded);
        assert_eq!(transfer.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_plan_yields_empty_report() {
        let scheduler = TransferScheduler::new(config(2, 1), CancellationToken::new());
        let report = scheduler
            .execute(&databases(&[]), Arc::new(FakeTransfer::default()))
            .await;
        assert_eq!(report.counts.total, 0);
        assert!(report.is_success());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
    }
}
