// azmigrate/src/verify/fingerprints.rs
use async_trait::async_trait;
use sqlx::Connection;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use super::{Fingerprint, Fingerprinter};
use crate::config::ResourceEndpoint;
use crate::credentials::CredentialProvider;
use crate::enumerate::postgres::{connect, count_rows, list_tables};
use crate::enumerate::{BlobEnumerator, RegistryEnumerator};
use crate::errors::{MigrationError, Result};
use crate::model::{Freshness, MigrationUnit, UnitKey};

/// PostgreSQL error code for "database does not exist".
const INVALID_CATALOG_NAME: &str = "3D000";

fn unexpected(unit: &MigrationUnit) -> MigrationError {
    MigrationError::Configuration(format!("cannot fingerprint {}", unit.identity()))
}

/// Per-table row counts of one database.
pub struct PostgresFingerprinter {
    credentials: Arc<CredentialProvider>,
}

impl PostgresFingerprinter {
    pub fn new(credentials: Arc<CredentialProvider>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Fingerprinter for PostgresFingerprinter {
    async fn fingerprint(&self, endpoint: &ResourceEndpoint, unit: &MigrationUnit) -> Result<Fingerprint> {
        let UnitKey::Database(database) = &unit.key else {
            return Err(unexpected(unit));
        };
        let mut conn = match connect(&self.credentials, endpoint, database).await {
            Ok(conn) => conn,
            Err(MigrationError::Sqlx(e))
                if e.as_database_error()
                    .and_then(|d| d.code())
                    .is_some_and(|code| code == INVALID_CATALOG_NAME) =>
            {
                return Ok(Fingerprint::Absent);
            }
            Err(e) => return Err(e),
        };

        let mut tables = BTreeMap::new();
        for table in list_tables(&mut conn).await? {
            let count = count_rows(&mut conn, &table).await?;
            tables.insert(table, count);
        }
        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close verification connection cleanly");
        }
        Ok(Fingerprint::RowCounts { tables })
    }
}

/// Blob count and total size of one container.
pub struct BlobFingerprinter {
    enumerator: Arc<BlobEnumerator>,
}

impl BlobFingerprinter {
    pub fn new(enumerator: Arc<BlobEnumerator>) -> Self {
        Self { enumerator }
    }
}

#[async_trait]
impl Fingerprinter for BlobFingerprinter {
    async fn fingerprint(&self, endpoint: &ResourceEndpoint, unit: &MigrationUnit) -> Result<Fingerprint> {
        let UnitKey::Container(container) = &unit.key else {
            return Err(unexpected(unit));
        };
        Ok(match self.enumerator.list_container(endpoint, container).await? {
            None => Fingerprint::Absent,
            Some(blobs) => Fingerprint::BlobStats {
                count: blobs.len() as u64,
                bytes: blobs.iter().filter_map(|b| b.size_bytes).sum(),
            },
        })
    }
}

/// Tag set of one repository.
pub struct RegistryFingerprinter {
    enumerator: Arc<RegistryEnumerator>,
}

impl RegistryFingerprinter {
    pub fn new(enumerator: Arc<RegistryEnumerator>) -> Self {
        Self { enumerator }
    }
}

#[async_trait]
impl Fingerprinter for RegistryFingerprinter {
    async fn fingerprint(&self, endpoint: &ResourceEndpoint, unit: &MigrationUnit) -> Result<Fingerprint> {
        let UnitKey::Repository(repository) = &unit.key else {
            return Err(unexpected(unit));
        };
        if !self
            .enumerator
            .repositories(endpoint)
            .await?
            .contains(repository)
        {
            return Ok(Fingerprint::Absent);
        }
        let tags = self
            .enumerator
            .tags(endpoint, repository)
            .await?
            .into_iter()
            .filter_map(|image| match image.key {
                UnitKey::Image { tag, .. } => {
                    Some((tag, image.freshness.as_ref().and_then(Freshness::timestamp)))
                }
                _ => None,
            })
            .collect();
        Ok(Fingerprint::Tags { tags })
    }
}
