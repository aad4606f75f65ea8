//! Azure Resource Migration Tool
//!
//! Copies PostgreSQL databases, blob containers and container registry images
//! between Azure subscriptions, then verifies the target against the source.

// azmigrate/src/main.rs
mod config;
mod credentials;
mod diff;
mod enumerate;
mod errors;
mod model;
mod orchestrator;
mod scheduler;
mod transfer;
mod utils;
mod verify;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::{RunOptions, ScratchOptions, Workflow, load_endpoint};
use credentials::{AzSecretBackend, CredentialProvider};
use diff::{DiffPolicy, TimeWindow};
use enumerate::{BlobEnumerator, PostgresEnumerator, RegistryEnumerator};
use model::{ResourceKind, Side};
use orchestrator::{Orchestrator, Toolkit, WorkflowOutcome, render_summary};
use scheduler::TransferFunction;
use transfer::{BlobTransfer, DatabaseTransfer, RegistryTransfer};
use utils::AzCli;
use utils::scratch::LazyScratch;
use verify::{BlobFingerprinter, PostgresFingerprinter, RegistryFingerprinter};

/// azmigrate - copy Azure resources between subscriptions
#[derive(Parser, Debug)]
#[command(name = "azmigrate")]
#[command(author, version, about = "Migrate Azure databases, blob storage and container registries")]
struct Cli {
    /// Log output format (logs go to stderr)
    #[arg(long, value_enum, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Source endpoint JSON document
    source: PathBuf,

    /// Target endpoint JSON document
    target: PathBuf,

    /// Only compare source and target, copy nothing
    #[arg(long)]
    verify_only: bool,

    /// Copy units even when the target looks up to date
    #[arg(long)]
    force: bool,

    /// Maximum concurrent transfers (defaults depend on the resource type)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Extra attempts for a failed unit before it is reported as failed
    #[arg(long, default_value_t = 0)]
    max_retries: u32,

    /// Write the full outcome as JSON to this path
    #[arg(long)]
    report_json: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Migrate PostgreSQL databases with pg_dump / pg_restore
    Database {
        #[command(flatten)]
        common: CommonArgs,

        /// Reuse dump files already present in the backup directory
        #[arg(long)]
        skip_backup: bool,

        /// Dump directory (defaults to a fresh timestamped directory)
        #[arg(long)]
        backup_dir: Option<PathBuf>,

        /// Pack the dump directory into this .tar.gz after the run
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Remove the dump directory after a successful run
        #[arg(long)]
        cleanup: bool,
    },

    /// Migrate blob containers with azcopy
    Storage {
        #[command(flatten)]
        common: CommonArgs,

        /// Reuse blobs already downloaded to the temp directory
        #[arg(long)]
        skip_download: bool,

        /// Download directory (defaults to a fresh timestamped directory)
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Remove the download directory after a successful run
        #[arg(long)]
        cleanup: bool,
    },

    /// Import container images with az acr import
    Registry {
        #[command(flatten)]
        common: CommonArgs,

        /// Print the plan without importing anything
        #[arg(long, conflicts_with = "verify_only")]
        diff_only: bool,

        /// Only consider tags updated in the last N days
        #[arg(long, default_value_t = 7, conflicts_with = "all_images")]
        days: u32,

        /// Consider every tag regardless of age
        #[arg(long)]
        all_images: bool,
    },
}

impl Commands {
    fn kind(&self) -> ResourceKind {
        match self {
            Commands::Database { .. } => ResourceKind::Database,
            Commands::Storage { .. } => ResourceKind::Storage,
            Commands::Registry { .. } => ResourceKind::Registry,
        }
    }

    fn common(&self) -> &CommonArgs {
        match self {
            Commands::Database { common, .. }
            | Commands::Storage { common, .. }
            | Commands::Registry { common, .. } => common,
        }
    }

    fn workflow(&self) -> Workflow {
        match self {
            _ if self.common().verify_only => Workflow::VerifyOnly,
            Commands::Registry { diff_only: true, .. } => Workflow::DiffOnly,
            Commands::Registry {
                all_images: false, ..
            } => Workflow::IncrementalSync,
            _ => Workflow::FullMigration,
        }
    }

    fn policy(&self) -> DiffPolicy {
        let window = match self {
            Commands::Registry {
                days,
                all_images: false,
                ..
            } => TimeWindow::LastDays(*days),
            _ => TimeWindow::Unbounded,
        };
        DiffPolicy::new(window).with_force(self.common().force)
    }

    fn scratch(&self) -> ScratchOptions {
        match self {
            Commands::Database {
                skip_backup,
                backup_dir,
                archive,
                cleanup,
                ..
            } => ScratchOptions {
                dir_override: backup_dir.clone(),
                root: None,
                reuse_existing: *skip_backup,
                cleanup: *cleanup,
                archive: archive.clone(),
            },
            Commands::Storage {
                skip_download,
                temp_dir,
                cleanup,
                ..
            } => ScratchOptions {
                dir_override: temp_dir.clone(),
                reuse_existing: *skip_download,
                cleanup: *cleanup,
                ..Default::default()
            },
            Commands::Registry { .. } => ScratchOptions::default(),
        }
    }

    fn run_options(&self) -> RunOptions {
        let common = self.common();
        let mut options = RunOptions::new(self.kind(), self.workflow(), self.policy());
        if let Some(concurrency) = common.concurrency {
            options.concurrency = concurrency.max(1);
        }
        options.max_attempts = common.max_retries.saturating_add(1);
        options.scratch = self.scratch();
        options
    }
}

/// Main entry point for the migration tool
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight transfers and stopping");
            watcher.cancel();
        }
    });

    match run_app(&cli.command, cancel).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(format: LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn run_app(command: &Commands, cancel: CancellationToken) -> Result<u8> {
    let kind = command.kind();
    let common = command.common();
    let source = Arc::new(
        load_endpoint(&common.source, kind, Side::Source)
            .context("Failed to load source configuration")?,
    );
    let target = Arc::new(
        load_endpoint(&common.target, kind, Side::Target)
            .context("Failed to load target configuration")?,
    );
    let options = command.run_options();

    let az = AzCli::locate().context("Azure CLI is required")?;
    let credentials = Arc::new(CredentialProvider::new(Arc::new(AzSecretBackend::new(
        az.clone(),
    ))));

    let scratch = Arc::new(LazyScratch::new(
        match kind {
            ResourceKind::Database => "db_backup",
            _ => "blob_transfer",
        },
        options.scratch.clone(),
    ));
    let copies = matches!(
        options.workflow,
        Workflow::FullMigration | Workflow::IncrementalSync
    );

    let toolkit = match kind {
        ResourceKind::Database => Toolkit {
            enumerator: Arc::new(PostgresEnumerator::new(credentials.clone())),
            fingerprinter: Arc::new(PostgresFingerprinter::new(credentials.clone())),
            transfer: if copies {
                Some(Arc::new(DatabaseTransfer::new(
                    credentials.clone(),
                    source.clone(),
                    target.clone(),
                    scratch.clone(),
                )?) as Arc<dyn TransferFunction>)
            } else {
                None
            },
        },
        ResourceKind::Storage => {
            let enumerator = Arc::new(BlobEnumerator::new(az.clone(), credentials.clone()));
            Toolkit {
                enumerator: enumerator.clone(),
                fingerprinter: Arc::new(BlobFingerprinter::new(enumerator)),
                transfer: if copies {
                    Some(Arc::new(BlobTransfer::new(
                        credentials.clone(),
                        source.clone(),
                        target.clone(),
                        scratch.clone(),
                    )?) as Arc<dyn TransferFunction>)
                } else {
                    None
                },
            }
        }
        ResourceKind::Registry => {
            let enumerator = Arc::new(RegistryEnumerator::new(az.clone()));
            Toolkit {
                enumerator: enumerator.clone(),
                fingerprinter: Arc::new(RegistryFingerprinter::new(enumerator)),
                transfer: copies.then(|| {
                    Arc::new(RegistryTransfer::new(
                        az.clone(),
                        credentials.clone(),
                        source.clone(),
                        target.clone(),
                    )) as Arc<dyn TransferFunction>
                }),
            }
        }
    };

    let orchestrator = Orchestrator::new(
        source,
        target,
        options,
        credentials.clone(),
        toolkit,
        cancel,
    );
    let outcome = orchestrator.run().await;
    credentials.clear();

    print!("{}", render_summary(&outcome));
    if let Some(path) = &common.report_json {
        write_report(&outcome, path)?;
    }
    match scratch.finalize(outcome.is_success()) {
        Ok(Some(archive)) => info!(
            path = %archive.path.display(),
            files = archive.files,
            "📦 dump directory archived"
        ),
        Ok(None) => {}
        Err(e) => warn!(error = ?e, "failed to finalize scratch directory"),
    }

    Ok(outcome.exit_code())
}

fn write_report(outcome: &WorkflowOutcome, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(outcome).context("Failed to serialize report")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}
