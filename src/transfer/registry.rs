// azmigrate/src/transfer/registry.rs
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{transfer_error, unsupported};
use crate::config::{Locator, ResourceEndpoint};
use crate::credentials::{CredentialKind, CredentialProvider};
use crate::errors::{MigrationError, Result};
use crate::model::{MigrationUnit, UnitKey};
use crate::scheduler::TransferFunction;
use crate::utils::AzCli;

/// Imports image tags into the target registry with `az acr import`.
pub struct RegistryTransfer {
    az: AzCli,
    credentials: Arc<CredentialProvider>,
    source: Arc<ResourceEndpoint>,
    target: Arc<ResourceEndpoint>,
}

fn registry_locator(endpoint: &ResourceEndpoint) -> Result<(&str, Option<&str>)> {
    match &endpoint.locator {
        Locator::Registry {
            registry_name,
            resource_group,
        } => Ok((registry_name, resource_group.as_deref())),
        _ => Err(MigrationError::Configuration(format!(
            "{} is not a registry endpoint",
            endpoint
        ))),
    }
}

/// Arguments for one import; the password is the last value so callers can keep it out of logs.
#[allow(clippy::too_many_arguments)]
pub(crate) fn import_args(
    target_registry: &str,
    target_subscription: &str,
    target_group: Option<&str>,
    source_registry: &str,
    repository: &str,
    tag: &str,
    username: &str,
    password: &str,
) -> Vec<String> {
    let image = format!("{}:{}", repository, tag);
    let mut args = vec![
        "acr".to_string(),
        "import".to_string(),
        "--name".to_string(),
        target_registry.to_string(),
        "--subscription".to_string(),
        target_subscription.to_string(),
    ];
    if let Some(group) = target_group {
        args.extend(["--resource-group".to_string(), group.to_string()]);
    }
    args.extend([
        "--source".to_string(),
        format!("{}.azurecr.io/{}", source_registry, image),
        "--image".to_string(),
        image,
        "--force".to_string(),
        "--username".to_string(),
        username.to_string(),
        "--password".to_string(),
        password.to_string(),
    ]);
    args
}

impl RegistryTransfer {
    pub fn new(
        az: AzCli,
        credentials: Arc<CredentialProvider>,
        source: Arc<ResourceEndpoint>,
        target: Arc<ResourceEndpoint>,
    ) -> Self {
        Self {
            az,
            credentials,
            source,
            target,
        }
    }

    async fn import(&self, repository: &str, tag: &str) -> Result<()> {
        let (source_registry, _) = registry_locator(&self.source)?;
        let (target_registry, target_group) = registry_locator(&self.target)?;
        let credential = self
            .credentials
            .resolve(&self.source, &CredentialKind::RegistryPassword)
            .await?;
        let username = credential.username.as_deref().unwrap_or(source_registry);

        let args = import_args(
            target_registry,
            &self.target.subscription,
            target_group,
            source_registry,
            repository,
            tag,
            username,
            credential.secret.expose(),
        );
        let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
        self.az.run(&borrowed).await?;
        info!(repository, tag, target = target_registry, "✓ image imported");
        Ok(())
    }
}

#[async_trait]
impl TransferFunction for RegistryTransfer {
    async fn transfer(&self, unit: &MigrationUnit) -> Result<()> {
        let UnitKey::Image { repository, tag } = &unit.key else {
            return Err(unsupported(unit));
        };
        self.import(repository, tag)
            .await
            .map_err(|e| transfer_error(unit, e))
    }
}
