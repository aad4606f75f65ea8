// azmigrate/src/transfer/blob.rs
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use url::Url;

use super::{transfer_error, unsupported};
use crate::config::{Locator, ResourceEndpoint};
use crate::credentials::{CredentialKind, CredentialProvider};
use crate::errors::{MigrationError, Result};
use crate::model::{MigrationUnit, UnitKey};
use crate::scheduler::TransferFunction;
use crate::utils::scratch::LazyScratch;
use crate::utils::{find_executable, run_command};

/// Copies blobs between storage accounts in two phases through local scratch storage.
pub struct BlobTransfer {
    credentials: Arc<CredentialProvider>,
    source: Arc<ResourceEndpoint>,
    target: Arc<ResourceEndpoint>,
    scratch: Arc<LazyScratch>,
    azcopy: PathBuf,
}

/// `https://<account>.blob.core.windows.net/<container>/<blob>?<sas>`
pub(crate) fn blob_url(account: &str, container: &str, name: &str, sas: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("https://{}.blob.core.windows.net/", account))?;
    url.path_segments_mut()
        .map_err(|_| MigrationError::Configuration(format!("invalid account name '{}'", account)))?
        .clear()
        .push(container)
        .extend(name.split('/'));
    url.set_query(Some(sas.trim_start_matches('?')));
    Ok(url)
}

/// Local path of a downloaded blob; names that would escape the scratch directory are refused.
pub(crate) fn local_relative_path(container: &str, name: &str) -> Option<PathBuf> {
    let relative = Path::new(container).join(name);
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then_some(relative)
}

impl BlobTransfer {
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
            azcopy: find_executable("azcopy")?,
        })
    }

    async fn url_for(&self, endpoint: &ResourceEndpoint, container: &str, name: &str) -> Result<Url> {
        let Locator::Storage { account_name, .. } = &endpoint.locator else {
            return Err(MigrationError::Configuration(format!(
                "{} is not a storage endpoint",
                endpoint
            )));
        };
        let sas = self
            .credentials
            .resolve(
                endpoint,
                &CredentialKind::ContainerSas {
                    container: container.to_string(),
                },
            )
            .await?;
        blob_url(account_name, container, name, sas.secret.expose())
    }

    async fn azcopy_copy(&self, from: &str, to: &str) -> Result<()> {
        run_command(
            &self.azcopy,
            ["copy", from, to, "--overwrite=true", "--log-level=ERROR"],
            &[],
        )
        .await
        .map(|_| ())
    }

    async fn copy(&self, unit: &MigrationUnit, container: &str, name: &str) -> Result<()> {
        let relative = local_relative_path(container, name).ok_or_else(|| MigrationError::Transfer {
            unit: unit.identity(),
            reason: "blob name does not map to a safe local path".to_string(),
        })?;
        let scratch = self.scratch.get().await?;
        let local = scratch.file(&relative)?;
        let local_str = local.display().to_string();

        if scratch.reusable(&local) {
            info!(blob = %unit.identity(), "reusing downloaded blob");
        } else {
            let source_url = self.url_for(&self.source, container, name).await?;
            self.azcopy_copy(source_url.as_str(), &local_str).await?;
        }

        let target_url = self.url_for(&self.target, container, name).await?;
        self.azcopy_copy(&local_str, target_url.as_str()).await?;
        info!(blob = %unit.identity(), bytes = unit.size_bytes.unwrap_or(0), "✓ blob copied");
        Ok(())
    }
}

#[async_trait]
impl TransferFunction for BlobTransfer {
    async fn transfer(&self, unit: &MigrationUnit) -> Result<()> {
        let UnitKey::Blob { container, name } = &unit.key else {
            return Err(unsupported(unit));
        };
        self.copy(unit, container, name)
            .await
            .map_err(|e| transfer_error(unit, e))
    }
}
