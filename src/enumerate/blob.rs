// azmigrate/src/enumerate/blob.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::{ResourceEnumerator, UnitFilter};
use crate::config::{Locator, ResourceEndpoint};
use crate::credentials::{CredentialKind, CredentialProvider};
use crate::errors::{MigrationError, Result};
use crate::model::MigrationUnit;
use crate::utils::{AzCli, STORAGE_KEY_ENV};

#[derive(Debug, Deserialize)]
pub(crate) struct BlobListing {
    pub name: String,
    pub properties: BlobProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BlobProperties {
    pub last_modified: Option<DateTime<Utc>>,
    pub content_length: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ContainerExists {
    exists: bool,
}

pub(crate) fn blob_units(container: &str, listing: Vec<BlobListing>) -> Vec<MigrationUnit> {
    listing
        .into_iter()
        .map(|blob| {
            MigrationUnit::blob(
                container,
                blob.name,
                blob.properties.last_modified,
                blob.properties.content_length,
            )
        })
        .collect()
}

/// Lists blobs of the configured containers through `az storage blob list`.
pub struct BlobEnumerator {
    az: AzCli,
    credentials: Arc<CredentialProvider>,
}

impl BlobEnumerator {
    pub fn new(az: AzCli, credentials: Arc<CredentialProvider>) -> Self {
        Self { az, credentials }
    }

    /// Blobs of one container; a container that does not exist yields nothing.
    pub async fn list_container(
        &self,
        endpoint: &ResourceEndpoint,
        container: &str,
    ) -> Result<Option<Vec<MigrationUnit>>> {
        let Locator::Storage { account_name, .. } = &endpoint.locator else {
            return Err(MigrationError::Configuration(format!(
                "{} is not a storage endpoint",
                endpoint
            )));
        };
        let key = self
            .credentials
            .resolve(endpoint, &CredentialKind::StorageAccountKey)
            .await?;
        let key_env = [(STORAGE_KEY_ENV, key.secret.expose())];

        let exists: ContainerExists = self
            .az
            .json_with_env(&[
                "storage", "container", "exists",
                "--account-name", account_name,
                "--name", container,
                "--subscription", &endpoint.subscription,
            ], &key_env)
            .await?;
        if !exists.exists {
            return Ok(None);
        }

        let listing: Vec<BlobListing> = self
            .az
            .json_with_env(&[
                "storage", "blob", "list",
                "--account-name", account_name,
                "--container-name", container,
                "--num-results", "*",
                "--subscription", &endpoint.subscription,
            ], &key_env)
            .await?;
        Ok(Some(blob_units(container, listing)))
    }
}

#[async_trait]
impl ResourceEnumerator for BlobEnumerator {
    async fn list(&self, endpoint: &ResourceEndpoint, filter: &UnitFilter) -> Result<Vec<MigrationUnit>> {
        let containers = filter.collections.clone().unwrap_or_default();
        let mut units = Vec::new();
        for container in &containers {
            let blobs = self
                .list_container(endpoint, container)
                .await
                .map_err(|e| MigrationError::enumeration(endpoint.to_string(), e))?
                .unwrap_or_default();
            info!(endpoint = %endpoint, container = %container, blobs = blobs.len(), "enumerated container");
            units.extend(blobs);
        }
        Ok(units)
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
