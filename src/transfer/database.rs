// azmigrate/src/transfer/database.rs
use async_trait::async_trait;
use sqlx::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{transfer_error, unsupported};
use crate::config::ResourceEndpoint;
use crate::credentials::{CredentialKind, CredentialProvider};
use crate::enumerate::postgres::connect;
use crate::errors::Result;
use crate::model::{MigrationUnit, UnitKey};
use crate::scheduler::TransferFunction;
use crate::utils::scratch::LazyScratch;
use crate::utils::{find_executable, quote_ident, run_command};

/// Copies a database with `pg_dump --format=custom` followed by `pg_restore`.
pub struct DatabaseTransfer {
    credentials: Arc<CredentialProvider>,
    source: Arc<ResourceEndpoint>,
    target: Arc<ResourceEndpoint>,
    scratch: Arc<LazyScratch>,
    pg_dump: PathBuf,
    pg_restore: PathBuf,
}

impl DatabaseTransfer {
    pub fn new(
        credentials: Arc<CredentialProvider>,
        source: Arc<ResourceEndpoint>,
        target: Arc<ResourceEndpoint>,
        scratch: Arc<LazyScratch>,
    ) -> Result<Self> {
        Ok(Self {
            credentials,
            source,
            target,
            scratch,
            pg_dump: find_executable("pg_dump")?,
            pg_restore: find_executable("pg_restore")?,
        })
    }

    /// libpq connection flags and environment for one endpoint; the password goes via PGPASSWORD.
    async fn libpq_args(&self, endpoint: &ResourceEndpoint, database: &str) -> Result<(Vec<String>, String, String)> {
        let pg = endpoint.postgres()?;
        let password = self
            .credentials
            .resolve(endpoint, &CredentialKind::DatabasePassword)
            .await?;
        let args = vec![
            "--host".to_string(),
            pg.host.clone(),
            "--port".to_string(),
            pg.port.to_string(),
            "--username".to_string(),
            pg.username.clone(),
            "--dbname".to_string(),
            database.to_string(),
        ];
        Ok((args, password.secret.expose().to_string(), pg.ssl_mode.clone()))
    }

    async fn dump(&self, database: &str, dump_file: &Path) -> Result<()> {
        let (mut args, password, ssl_mode) = self.libpq_args(&self.source, database).await?;
        args.extend([
            "--format=custom".to_string(),
            "--no-owner".to_string(),
            "--no-acl".to_string(),
            "--file".to_string(),
            dump_file.display().to_string(),
        ]);
        info!(database, file = %dump_file.display(), "dumping source database");
        run_command(
            &self.pg_dump,
            &args,
            &[("PGPASSWORD", password.as_str()), ("PGSSLMODE", ssl_mode.as_str())],
        )
        .await?;
        info!(database, "✓ dump complete");
        Ok(())
    }

    /// Creates the target database when it does not exist yet.
    async fn ensure_target_database(&self, database: &str) -> Result<()> {
        let mut admin = connect(&self.credentials, &self.target, "postgres").await?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(database)
                .fetch_one(&mut admin)
                .await?;
        if !exists {
            info!(database, "creating target database");
            sqlx::query(&format!("CREATE DATABASE {}", quote_ident(database)))
                .execute(&mut admin)
                .await?;
        }
        if let Err(e) = admin.close().await {
            warn!(error = %e, "failed to close admin connection cleanly");
        }
        Ok(())
    }

    async fn restore(&self, database: &str, dump_file: &Path) -> Result<()> {
        let (mut args, password, ssl_mode) = self.libpq_args(&self.target, database).await?;
        args.extend([
            "--no-owner".to_string(),
            "--no-acl".to_string(),
            "--clean".to_string(),
            "--if-exists".to_string(),
            dump_file.display().to_string(),
        ]);
        info!(database, "restoring into target database");
        run_command(
            &self.pg_restore,
            &args,
            &[("PGPASSWORD", password.as_str()), ("PGSSLMODE", ssl_mode.as_str())],
        )
        .await?;
        info!(database, "✓ restore complete");
        Ok(())
    }

    async fn copy(&self, database: &str) -> Result<()> {
        let scratch = self.scratch.get().await?;
        let dump_file = scratch.file(format!("{}.dump", database))?;
        if scratch.reusable(&dump_file) {
            info!(database, file = %dump_file.display(), "reusing existing dump");
        } else {
            self.dump(database, &dump_file).await?;
        }
        self.ensure_target_database(database).await?;
        self.restore(database, &dump_file).await
    }
}

#[async_trait]
impl TransferFunction for DatabaseTransfer {
    async fn transfer(&self, unit: &MigrationUnit) -> Result<()> {
        let UnitKey::Database(database) = &unit.key else {
            return Err(unsupported(unit));
        };
        self.copy(database)
            .await
            .map_err(|e| transfer_error(unit, e))
    }
}
