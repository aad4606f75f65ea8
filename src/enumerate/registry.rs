// azmigrate/src/enumerate/registry.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::{ResourceEnumerator, UnitFilter};
use crate::config::{Locator, ResourceEndpoint};
use crate::errors::{MigrationError, Result};
use crate::model::MigrationUnit;
use crate::utils::AzCli;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TagDetail {
    pub name: String,
    pub last_update_time: Option<DateTime<Utc>>,
    pub digest: Option<String>,
}

pub(crate) fn image_units(repository: &str, tags: Vec<TagDetail>) -> Vec<MigrationUnit> {
    tags.into_iter()
        .map(|tag| MigrationUnit::image(repository, tag.name, tag.last_update_time, tag.digest))
        .collect()
}

/// Lists (repository, tag) pairs through `az acr repository`.
pub struct RegistryEnumerator {
    az: AzCli,
}

impl RegistryEnumerator {
    pub fn new(az: AzCli) -> Self {
        Self { az }
    }

    fn registry_name(endpoint: &ResourceEndpoint) -> Result<&str> {
        match &endpoint.locator {
            Locator::Registry { registry_name, .. } => Ok(registry_name),
            _ => Err(MigrationError::Configuration(format!(
                "{} is not a registry endpoint",
                endpoint
            ))),
        }
    }

    pub async fn repositories(&self, endpoint: &ResourceEndpoint) -> Result<Vec<String>> {
        let registry = Self::registry_name(endpoint)?;
        self.az
            .json(&[
                "acr", "repository", "list",
                "--name", registry,
                "--subscription", &endpoint.subscription,
            ])
            .await
    }

    pub async fn tags(&self, endpoint: &ResourceEndpoint, repository: &str) -> Result<Vec<MigrationUnit>> {
        let registry = Self::registry_name(endpoint)?;
        let details: Vec<TagDetail> = self
            .az
            .json(&[
                "acr", "repository", "show-tags",
                "--name", registry,
                "--repository", repository,
                "--detail",
                "--orderby", "time_desc",
                "--subscription", &endpoint.subscription,
            ])
            .await?;
        Ok(image_units(repository, details))
    }

    async fn list_inner(&self, endpoint: &ResourceEndpoint, filter: &UnitFilter) -> Result<Vec<MigrationUnit>> {
        let existing = self.repositories(endpoint).await?;
        let wanted = filter.collections.clone().unwrap_or_else(|| existing.clone());

        let mut units = Vec::new();
        for repository in &wanted {
            // A repository missing on this side simply has no tags yet.
            if !existing.contains(repository) {
                debug!(endpoint = %endpoint, repository = %repository, "repository not present");
                continue;
            }
            let tags = self.tags(endpoint, repository).await?;
            debug!(repository = %repository, tags = tags.len(), "enumerated tags");
            units.extend(tags);
        }
        info!(endpoint = %endpoint, repositories = wanted.len(), images = units.len(), "enumerated registry");
        Ok(units)
    }
}

#[async_trait]
impl ResourceEnumerator for RegistryEnumerator {
    async fn list(&self, endpoint: &ResourceEndpoint, filter: &UnitFilter) -> Result<Vec<MigrationUnit>> {
        self.list_inner(endpoint, filter)
            .await
            .map_err(|e| MigrationError::enumeration(endpoint.to_string(), e))
    }

    async fn list_collections(
        &self,
        endpoint: &ResourceEndpoint,
        filter: &UnitFilter,
    ) -> Result<Vec<MigrationUnit>> {
        let names = match &filter.collections {
            Some(names) => names.clone(),
            None => self
                .repositories(endpoint)
                .await
                .map_err(|e| MigrationError::enumeration(endpoint.to_string(), e))?,
        };
        Ok(names.into_iter().map(MigrationUnit::repository).collect())
    }
}
