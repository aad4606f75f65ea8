// azmigrate/src/credentials/az_backend.rs
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;

use super::{Credential, CredentialKind, CredentialRequest, Secret, SecretBackend};
use crate::config::{Locator, PasswordSource};
use crate::errors::{MigrationError, Result};
use crate::model::Side;
use crate::utils::{AzCli, STORAGE_KEY_ENV};

#[derive(Debug, Deserialize)]
struct KeyVaultSecret {
    value: String,
    attributes: Option<KeyVaultAttributes>,
}

#[derive(Debug, Deserialize)]
struct KeyVaultAttributes {
    expires: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct StorageAccountKey {
    value: String,
}

#[derive(Debug, Deserialize)]
struct RegistryCredentials {
    username: String,
    passwords: Vec<RegistryPassword>,
}

#[derive(Debug, Deserialize)]
struct RegistryPassword {
    value: String,
}

/// Fetches secrets through the `az` CLI, scoped to the endpoint's subscription.
pub struct AzSecretBackend {
    az: AzCli,
    /// Lifetime assumed for secrets the backend reports no expiry for.
    default_ttl: Duration,
    sas_ttl: Duration,
}

impl AzSecretBackend {
    pub fn new(az: AzCli) -> Self {
        Self {
            az,
            default_ttl: Duration::minutes(30),
            sas_ttl: Duration::hours(4),
        }
    }

    async fn key_vault_secret(&self, subscription: &str, vault: &str, name: &str) -> Result<Credential> {
        let secret: KeyVaultSecret = self
            .az
            .json(&[
                "keyvault", "secret", "show",
                "--vault-name", vault,
                "--name", name,
                "--subscription", subscription,
            ])
            .await?;
        let default_expiry = Utc::now() + self.default_ttl;
        let expires_at = secret
            .attributes
            .and_then(|a| a.expires)
            .map(|e| e.min(default_expiry))
            .unwrap_or(default_expiry);
        Ok(Credential::new(Secret::new(secret.value), expires_at))
    }

    async fn storage_key(&self, subscription: &str, account: &str, resource_group: &str) -> Result<Credential> {
        let keys: Vec<StorageAccountKey> = self
            .az
            .json(&[
                "storage", "account", "keys", "list",
                "--account-name", account,
                "--resource-group", resource_group,
                "--subscription", subscription,
            ])
            .await?;
        let key = keys.into_iter().next().ok_or_else(|| {
            MigrationError::Configuration(format!("storage account '{}' returned no keys", account))
        })?;
        Ok(Credential::new(Secret::new(key.value), Utc::now() + self.default_ttl))
    }

    async fn container_sas(
        &self,
        request: &CredentialRequest<'_>,
        subscription: &str,
        account: &str,
        container: &str,
    ) -> Result<Credential> {
        let account_key = request.account_key.as_ref().ok_or_else(|| {
            MigrationError::Configuration("SAS generation requires the storage account key".into())
        })?;
        // Source containers are only read; target containers also need create/write.
        let permissions = match request.endpoint.side {
            Side::Source => "rl",
            Side::Target => "racwl",
        };
        let expires_at = Utc::now() + self.sas_ttl;
        let expiry = expires_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let token: String = self
            .az
            .json_with_env(&[
                "storage", "container", "generate-sas",
                "--account-name", account,
                "--name", container,
                "--permissions", permissions,
                "--expiry", &expiry,
                "--https-only",
                "--subscription", subscription,
            ], &[(STORAGE_KEY_ENV, account_key.expose())])
            .await?;
        Ok(Credential::new(Secret::new(token), expires_at))
    }

    async fn registry_password(&self, subscription: &str, registry: &str) -> Result<Credential> {
        let creds: RegistryCredentials = self
            .az
            .json(&[
                "acr", "credential", "show",
                "--name", registry,
                "--subscription", subscription,
            ])
            .await?;
        let password = creds.passwords.into_iter().next().ok_or_else(|| {
            MigrationError::Configuration(format!(
                "registry '{}' has no admin passwords; enable the admin user",
                registry
            ))
        })?;
        Ok(Credential::new(Secret::new(password.value), Utc::now() + self.default_ttl)
            .with_username(creds.username))
    }
}

#[async_trait]
impl SecretBackend for AzSecretBackend {
    async fn fetch(&self, request: &CredentialRequest<'_>) -> Result<Credential> {
        let endpoint = request.endpoint;
        let subscription = endpoint.subscription.as_str();
        match (request.kind, &endpoint.locator) {
            (CredentialKind::DatabasePassword, Locator::Postgres(pg)) => match &pg.password {
                PasswordSource::KeyVault { vault, secret_name } => {
                    self.key_vault_secret(subscription, vault, secret_name).await
                }
                PasswordSource::Inline(secret) => {
                    Ok(Credential::new(secret.clone(), DateTime::<Utc>::MAX_UTC))
                }
            },
            (CredentialKind::StorageAccountKey, Locator::Storage { account_name, resource_group }) => {
                self.storage_key(subscription, account_name, resource_group).await
            }
            (CredentialKind::ContainerSas { container }, Locator::Storage { account_name, .. }) => {
                self.container_sas(request, subscription, account_name, container).await
            }
            (CredentialKind::RegistryPassword, Locator::Registry { registry_name, .. }) => {
                self.registry_password(subscription, registry_name).await
            }
            (kind, _) => Err(MigrationError::Configuration(format!(
                "{} credentials do not apply to {}",
                kind, endpoint
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_vault_secret_with_expiry() {
        let secret: KeyVaultSecret = serde_json::from_str(
            r#"{"value": "pw", "attributes": {"enabled": true, "expires": "2030-01-01T00:00:00+00:00"}}"#,
        )
        .unwrap();
        assert_eq!(secret.value, "pw");
        assert!(secret.attributes.unwrap().expires.is_some());
    }

    #[test]
    fn test_parse_key_vault_secret_without_expiry() {
        let secret: KeyVaultSecret =
            serde_json::from_str(r#"{"value": "pw", "attributes": {"expires": null}}"#).unwrap();
        assert!(secret.attributes.unwrap().expires.is_none());
    }

    #[test]
    fn test_parse_registry_credentials() {
        let creds: RegistryCredentials = serde_json::from_str(
            r#"{"username": "acrsource", "passwords": [{"name": "password", "value": "a"}, {"name": "password2", "value": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(creds.username, "acrsource");
        assert_eq!(creds.passwords[0].value, "a");
    }

    #[test]
    fn test_parse_storage_keys() {
        let keys: Vec<StorageAccountKey> = serde_json::from_str(
            r#"[{"keyName": "key1", "permissions": "FULL", "value": "k1"}, {"keyName": "key2", "value": "k2"}]"#,
        )
        .unwrap();
        assert_eq!(keys[0].value, "k1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_container_sas_keeps_account_key_off_command_line() {
        use crate::config::ResourceEndpoint;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake_az = dir.path().join("az");
        std::fs::write(
            &fake_az,
            "#!/bin/sh\n\
             for arg in \"$@\"; do\n\
             case \"$arg\" in --account-key|*k3y*) echo 'key on command line' >&2; exit 2;; esac\n\
             done\n\
             printf '\"sig-%s\"' \"$AZURE_STORAGE_KEY\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake_az, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = AzSecretBackend::new(AzCli::at(fake_az));
        let endpoint = ResourceEndpoint {
            side: Side::Target,
            subscription: "sub-b".into(),
            locator: Locator::Storage {
                account_name: "sttarget".into(),
                resource_group: "rg".into(),
            },
            units: None,
        };
        let kind = CredentialKind::ContainerSas {
            container: "media".into(),
        };
        let request = CredentialRequest {
            endpoint: &endpoint,
            kind: &kind,
            account_key: Some(Secret::new("k3y==")),
        };

        let sas = backend
            .container_sas(&request, "sub-b", "sttarget", "media")
            .await
            .unwrap();
        assert_eq!(sas.secret.expose(), "sig-k3y==");
    }
}
