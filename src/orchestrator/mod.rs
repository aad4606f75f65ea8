// azmigrate/src/orchestrator/mod.rs
pub(crate) mod summary;

pub use summary::render_summary;

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ResourceEndpoint, RunOptions, Workflow};
use crate::credentials::{CredentialProvider, required_credentials};
use crate::diff;
use crate::enumerate::{ResourceEnumerator, UnitFilter};
use crate::errors::{MigrationError, Result};
use crate::model::{MigrationReport, MigrationUnit, SelectionReason, TransferPlan};
use crate::scheduler::{SchedulerConfig, TransferFunction, TransferScheduler};
use crate::verify::{Fingerprinter, Reconciliation, Verifier};

/// Workflow state machine: `Configured → Enumerating → Planning → Transferring → Verifying → Reported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Configured,
    Enumerating,
    Planning,
    Transferring,
    Verifying,
    Reported,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configured => "configured",
            Stage::Enumerating => "enumerating",
            Stage::Planning => "planning",
            Stage::Transferring => "transferring",
            Stage::Verifying => "verifying",
            Stage::Reported => "reported",
        };
        f.write_str(name)
    }
}

/// The error that ended a workflow early, and the stage it happened in.
#[derive(Debug, Clone, Serialize)]
pub struct FatalError {
    pub stage: Stage,
    pub code: String,
    pub message: String,
}

/// Everything a workflow produced. Serialized as-is by `--report-json`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    pub workflow: Workflow,
    pub stage: Stage,
    pub fatal: Option<FatalError>,
    pub plan: Option<TransferPlan>,
    pub report: MigrationReport,
    pub reconciliations: Vec<Reconciliation>,
}

impl WorkflowOutcome {
    fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            stage: Stage::Configured,
            fatal: None,
            plan: None,
            report: MigrationReport::new(),
            reconciliations: Vec::new(),
        }
    }

    pub fn mismatches(&self) -> usize {
        self.reconciliations.iter().filter(|r| !r.matched).count()
    }

    /// A run succeeds only when nothing failed and no differences remain.
    pub fn is_success(&self) -> bool {
        let plan_clean = match (self.workflow, &self.plan) {
            (Workflow::DiffOnly, Some(plan)) => plan.is_empty(),
            _ => true,
        };
        self.fatal.is_none() && self.report.is_success() && self.mismatches() == 0 && plan_clean
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// Resource-specific pieces the orchestrator drives.
pub struct Toolkit {
    pub enumerator: Arc<dyn ResourceEnumerator>,
    pub fingerprinter: Arc<dyn Fingerprinter>,
    /// Absent for read-only workflows, which never need the copy tools installed.
    pub transfer: Option<Arc<dyn TransferFunction>>,
}

pub struct Orchestrator {
    source: Arc<ResourceEndpoint>,
    target: Arc<ResourceEndpoint>,
    options: RunOptions,
    credentials: Arc<CredentialProvider>,
    toolkit: Toolkit,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        source: Arc<ResourceEndpoint>,
        target: Arc<ResourceEndpoint>,
        options: RunOptions,
        credentials: Arc<CredentialProvider>,
        toolkit: Toolkit,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            target,
            options,
            credentials,
            toolkit,
            cancel,
        }
    }

    /// Runs the configured workflow to completion. Never returns an error: fatal
    /// failures end up in [`WorkflowOutcome::fatal`].
    pub async fn run(&self) -> WorkflowOutcome {
        let mut outcome = WorkflowOutcome::new(self.options.workflow);
        info!(
            workflow = %self.options.workflow,
            source = %self.source,
            target = %self.target,
            "🚀 starting workflow"
        );

        if let Err(e) = self.drive(&mut outcome).await {
            error!(stage = %outcome.stage, code = e.code(), error = %e, "workflow aborted");
            outcome.fatal = Some(FatalError {
                stage: outcome.stage,
                code: e.code().to_string(),
                message: e.to_string(),
            });
        }
        if outcome.report.finished_at.is_none() {
            outcome.report.finish(self.cancel.is_cancelled());
        }

        outcome.stage = Stage::Reported;
        info!(
            workflow = %outcome.workflow,
            succeeded = outcome.report.counts.succeeded,
            failed = outcome.report.counts.failed,
            skipped = outcome.report.counts.skipped,
            mismatches = outcome.mismatches(),
            "workflow finished"
        );
        outcome
    }

    async fn drive(&self, outcome: &mut WorkflowOutcome) -> Result<()> {
        self.preflight_credentials().await?;

        if self.options.workflow == Workflow::VerifyOnly {
            return self.verify(outcome).await;
        }

        self.enter(outcome, Stage::Enumerating)?;
        let (source_units, target_units) = self.enumerate_both().await?;
        info!(
            source = source_units.len(),
            target = target_units.len(),
            "enumeration complete"
        );

        self.enter(outcome, Stage::Planning)?;
        let plan = diff::plan(&source_units, &target_units, &self.options.policy);
        info!(
            planned = plan.len(),
            missing = plan.count(SelectionReason::Missing),
            stale = plan.count(SelectionReason::Stale),
            forced = plan.count(SelectionReason::Forced),
            "transfer plan computed"
        );
        outcome.plan = Some(plan);
        if self.options.workflow == Workflow::DiffOnly {
            return Ok(());
        }

        self.enter(outcome, Stage::Transferring)?;
        let transfer = self.toolkit.transfer.clone().ok_or_else(|| {
            MigrationError::Configuration(format!(
                "{} workflow has no transfer function",
                self.options.workflow
            ))
        })?;
        let scheduler = TransferScheduler::new(
            SchedulerConfig {
                concurrency: self.options.concurrency,
                max_attempts: self.options.max_attempts,
                backoff_base: self.options.backoff_base,
            },
            self.cancel.clone(),
        );
        if let Some(plan) = &outcome.plan {
            outcome.report = scheduler.execute(plan, transfer).await;
        }
        if outcome.report.cancelled {
            warn!("run cancelled, skipping verification");
            return Ok(());
        }

        self.verify(outcome).await
    }

    fn enter(&self, outcome: &mut WorkflowOutcome, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(MigrationError::Cancelled(format!("before {}", stage)));
        }
        info!(stage = %stage, "entering stage");
        outcome.stage = stage;
        Ok(())
    }

    /// Resolves every credential the endpoints need so a denial aborts before any listing.
    async fn preflight_credentials(&self) -> Result<()> {
        for endpoint in [&self.source, &self.target] {
            for kind in required_credentials(endpoint) {
                self.credentials.resolve(endpoint, &kind).await?;
            }
        }
        Ok(())
    }

    async fn enumerate_both(&self) -> Result<(Vec<MigrationUnit>, Vec<MigrationUnit>)> {
        // The target is only interesting where it overlaps the source selection.
        let filter = UnitFilter::from_endpoint(&self.source);
        let (source, target) = tokio::join!(
            self.toolkit.enumerator.list(&self.source, &filter),
            self.toolkit.enumerator.list(&self.target, &filter),
        );
        Ok((
            source.map_err(|e| as_enumeration(&self.source, e))?,
            target.map_err(|e| as_enumeration(&self.target, e))?,
        ))
    }

    async fn verify(&self, outcome: &mut WorkflowOutcome) -> Result<()> {
        self.enter(outcome, Stage::Verifying)?;
        let filter = UnitFilter::from_endpoint(&self.source);
        let collections = self
            .toolkit
            .enumerator
            .list_collections(&self.source, &filter)
            .await
            .map_err(|e| as_enumeration(&self.source, e))?;

        let verifier = Verifier::new(self.toolkit.fingerprinter.clone())
            .with_window(self.options.policy.window, self.options.policy.reference_time);
        outcome.reconciliations = verifier
            .reconcile(&self.source, &self.target, &collections)
            .await;
        Ok(())
    }
}

fn as_enumeration(endpoint: &ResourceEndpoint, err: MigrationError) -> MigrationError {
    if err.is_fatal() {
        err
    } else {
        MigrationError::enumeration(endpoint.to_string(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Locator;
    use crate::credentials::{Credential, CredentialRequest, Secret, SecretBackend};
    use crate::diff::DiffPolicy;
    use crate::model::{ResourceKind, Side, TransferStatus};
    use crate::verify::Fingerprint;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory storage account pair shared by the fakes.
    #[derive(Default)]
    struct World {
        source: Mutex<Vec<MigrationUnit>>,
        target: Mutex<Vec<MigrationUnit>>,
        list_calls: AtomicUsize,
        transfer_calls: AtomicUsize,
        failing: HashSet<String>,
    }

    impl World {
        fn with_blobs(source: &[&str], target: &[&str]) -> Self {
            let units = |names: &[&str]| {
                names
                    .iter()
                    .map(|n| MigrationUnit::blob("media", *n, Some(Utc::now() - Duration::hours(1)), Some(10)))
                    .collect::<Vec<_>>()
            };
            Self {
                source: Mutex::new(units(source)),
                target: Mutex::new(units(target)),
                ..Default::default()
            }
        }

        fn side(&self, side: Side) -> &Mutex<Vec<MigrationUnit>> {
            match side {
                Side::Source => &self.source,
                Side::Target => &self.target,
            }
        }
    }

    struct FakeEnumerator(Arc<World>);

    #[async_trait]
    impl ResourceEnumerator for FakeEnumerator {
        async fn list(&self, endpoint: &ResourceEndpoint, _filter: &UnitFilter) -> Result<Vec<MigrationUnit>> {
            self.0.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.0.side(endpoint.side).lock().unwrap().clone())
        }

        async fn list_collections(
            &self,
            _endpoint: &ResourceEndpoint,
            filter: &UnitFilter,
        ) -> Result<Vec<MigrationUnit>> {
            Ok(filter
                .collections
                .iter()
                .flatten()
                .map(MigrationUnit::container)
                .collect())
        }
    }

    struct FakeFingerprinter(Arc<World>);

    #[async_trait]
    impl Fingerprinter for FakeFingerprinter {
        async fn fingerprint(&self, endpoint: &ResourceEndpoint, unit: &MigrationUnit) -> Result<Fingerprint> {
            let units = self.0.side(endpoint.side).lock().unwrap();
            let blobs: Vec<_> = units
                .iter()
                .filter(|u| u.key.collection() == unit.key.collection())
                .collect();
            Ok(Fingerprint::BlobStats {
                count: blobs.len() as u64,
                bytes: blobs.iter().filter_map(|u| u.size_bytes).sum(),
            })
        }
    }

    struct FakeTransfer(Arc<World>);

    #[async_trait]
    impl TransferFunction for FakeTransfer {
        async fn transfer(&self, unit: &MigrationUnit) -> Result<()> {
            self.0.transfer_calls.fetch_add(1, Ordering::SeqCst);
            if self.0.failing.contains(&unit.identity()) {
                return Err(MigrationError::Transfer {
                    unit: unit.identity(),
                    reason: "azcopy exited with 1".into(),
                });
            }
            self.0.target.lock().unwrap().push(unit.clone());
            Ok(())
        }
    }

    struct StaticBackend {
        deny: bool,
    }

    #[async_trait]
    impl SecretBackend for StaticBackend {
        async fn fetch(&self, _request: &CredentialRequest<'_>) -> Result<Credential> {
            if self.deny {
                return Err(MigrationError::Command {
                    program: "az".into(),
                    status: "exit status: 1".into(),
                    stderr: "AuthorizationFailed".into(),
                });
            }
            Ok(Credential::new(Secret::new("key"), Utc::now() + Duration::hours(1)))
        }
    }

    fn endpoint(side: Side, account: &str) -> Arc<ResourceEndpoint> {
        Arc::new(ResourceEndpoint {
            side,
            subscription: format!("sub-{}", side),
            locator: Locator::Storage {
                account_name: account.into(),
                resource_group: "rg".into(),
            },
            units: Some(vec!["media".into()]),
        })
    }

    fn orchestrator(world: &Arc<World>, workflow: Workflow, deny: bool) -> Orchestrator {
        let mut options = RunOptions::new(ResourceKind::Storage, workflow, DiffPolicy::unbounded());
        options.backoff_base = std::time::Duration::from_millis(1);
        Orchestrator::new(
            endpoint(Side::Source, "stsource"),
            endpoint(Side::Target, "sttarget"),
            options,
            Arc::new(CredentialProvider::new(Arc::new(StaticBackend { deny }))),
            Toolkit {
                enumerator: Arc::new(FakeEnumerator(world.clone())),
                fingerprinter: Arc::new(FakeFingerprinter(world.clone())),
                transfer: Some(Arc::new(FakeTransfer(world.clone())) as Arc<dyn TransferFunction>),
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_full_migration_copies_missing_units_and_verifies() {
        let world = Arc::new(World::with_blobs(&["a", "b", "c"], &["a"]));
        let outcome = orchestrator(&world, Workflow::FullMigration, false).run().await;

        let plan = outcome.plan.as_ref().unwrap();
        assert_eq!(plan.identities(), vec!["blob:media/b", "blob:media/c"]);
        assert_eq!(outcome.report.counts.succeeded, 2);
        assert_eq!(outcome.stage, Stage::Reported);
        assert_eq!(outcome.reconciliations.len(), 1);
        assert!(outcome.reconciliations[0].matched);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let world = Arc::new(World::with_blobs(&["a", "b", "c"], &["a"]));
        orchestrator(&world, Workflow::FullMigration, false).run().await;
        let again = orchestrator(&world, Workflow::FullMigration, false).run().await;

        assert!(again.plan.as_ref().unwrap().is_empty());
        assert_eq!(again.report.counts.total, 0);
        assert_eq!(world.transfer_calls.load(Ordering::SeqCst), 2);
        assert_eq!(again.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_still_verifies_and_fails_exit_code() {
        let mut world = World::with_blobs(&["a", "b", "c"], &[]);
        world.failing.insert("blob:media/b".into());
        let world = Arc::new(world);
        let outcome = orchestrator(&world, Workflow::FullMigration, false).run().await;

        assert!(outcome.fatal.is_none());
        assert_eq!(outcome.report.counts.succeeded, 2);
        assert_eq!(outcome.report.counts.failed, 1);
        let failed = &outcome.report.results[1];
        assert_eq!(failed.status, TransferStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("azcopy exited with 1"));
        assert_eq!(outcome.reconciliations.len(), 1);
        assert!(!outcome.reconciliations[0].matched);
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_diff_only_reports_plan_without_transfers() {
        let world = Arc::new(World::with_blobs(&["a", "b"], &["a"]));
        let outcome = orchestrator(&world, Workflow::DiffOnly, false).run().await;

        assert_eq!(outcome.plan.as_ref().unwrap().len(), 1);
        assert!(outcome.report.results.is_empty());
        assert!(outcome.reconciliations.is_empty());
        assert_eq!(world.transfer_calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_diff_only_with_nothing_to_do_succeeds() {
        let world = Arc::new(World::with_blobs(&["a"], &["a"]));
        let outcome = orchestrator(&world, Workflow::DiffOnly, false).run().await;
        assert!(outcome.plan.as_ref().unwrap().is_empty());
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_credential_denial_stops_before_enumeration() {
        let world = Arc::new(World::with_blobs(&["a"], &[]));
        let outcome = orchestrator(&world, Workflow::FullMigration, true).run().await;

        let fatal = outcome.fatal.as_ref().unwrap();
        assert_eq!(fatal.code, "CredentialUnavailable");
        assert_eq!(fatal.stage, Stage::Configured);
        assert_eq!(outcome.stage, Stage::Reported);
        assert_eq!(world.list_calls.load(Ordering::SeqCst), 0);
        assert!(outcome.plan.is_none());
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_verify_only_skips_enumeration_and_transfer() {
        let world = Arc::new(World::with_blobs(&["a", "b"], &["a"]));
        let outcome = orchestrator(&world, Workflow::VerifyOnly, false).run().await;

        assert_eq!(world.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(world.transfer_calls.load(Ordering::SeqCst), 0);
        assert!(outcome.plan.is_none());
        assert_eq!(outcome.reconciliations.len(), 1);
        assert!(!outcome.reconciliations[0].matched);
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reports_cancellation() {
        let world = Arc::new(World::with_blobs(&["a"], &[]));
        let orchestrator = orchestrator(&world, Workflow::FullMigration, false);
        orchestrator.cancel.cancel();
        let outcome = orchestrator.run().await;

        assert_eq!(outcome.fatal.as_ref().unwrap().code, "Cancelled");
        assert!(outcome.report.cancelled);
        assert_eq!(world.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.exit_code(), 1);
    }
}
