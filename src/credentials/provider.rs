// azmigrate/src/credentials/provider.rs
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{Credential, CredentialKind, CredentialRequest, Secret, SecretBackend};
use crate::config::{PasswordSource, ResourceEndpoint};
use crate::errors::{MigrationError, Result};

type Slot = Arc<tokio::sync::Mutex<Option<Credential>>>;

/// Resolves credentials through an in-memory, expiry-aware cache.
///
/// Each (endpoint, kind) pair has its own async slot: concurrent callers that find the
/// entry missing or expired queue on the slot, the first one refreshes, and the rest
/// reuse its result instead of issuing their own backend call.
pub struct CredentialProvider {
    backend: Arc<dyn SecretBackend>,
    slots: Mutex<HashMap<(String, CredentialKind), Slot>>,
    /// Credentials this close to expiry are treated as already expired.
    refresh_margin: Duration,
}

impl CredentialProvider {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self {
            backend,
            slots: Mutex::new(HashMap::new()),
            refresh_margin: Duration::seconds(60),
        }
    }

    pub async fn resolve(
        &self,
        endpoint: &ResourceEndpoint,
        kind: &CredentialKind,
    ) -> Result<Credential> {
        if let (CredentialKind::DatabasePassword, Ok(pg)) = (kind, endpoint.postgres()) {
            if let PasswordSource::Inline(secret) = &pg.password {
                return Ok(Credential::new(secret.clone(), DateTime::<Utc>::MAX_UTC));
            }
        }

        let account_key = match kind {
            CredentialKind::ContainerSas { .. } => Some(
                self.cached_or_fetch(endpoint, &CredentialKind::StorageAccountKey, None)
                    .await?
                    .secret,
            ),
            _ => None,
        };
        self.cached_or_fetch(endpoint, kind, account_key).await
    }

    async fn cached_or_fetch(
        &self,
        endpoint: &ResourceEndpoint,
        kind: &CredentialKind,
        account_key: Option<Secret>,
    ) -> Result<Credential> {
        let slot = self.slot(endpoint, kind);
        let mut cached = slot.lock().await;
        if let Some(credential) = cached.as_ref() {
            if credential.is_valid_at(Utc::now() + self.refresh_margin) {
                return Ok(credential.clone());
            }
            debug!(endpoint = %endpoint, kind = %kind, "cached credential expired");
        }

        let request = CredentialRequest {
            endpoint,
            kind,
            account_key,
        };
        let fresh = self
            .backend
            .fetch(&request)
            .await
            .map_err(|e| unavailable(endpoint, kind, e))?;
        info!(endpoint = %endpoint, kind = %kind, expires_at = %fresh.expires_at, "credential refreshed");

        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drops every cached secret.
    pub fn clear(&self) {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn slot(&self, endpoint: &ResourceEndpoint, kind: &CredentialKind) -> Slot {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .entry((endpoint.cache_key(), kind.clone()))
            .or_default()
            .clone()
    }
}

fn unavailable(endpoint: &ResourceEndpoint, kind: &CredentialKind, err: MigrationError) -> MigrationError {
    match err {
        e @ MigrationError::CredentialUnavailable { .. } => e,
        other => MigrationError::CredentialUnavailable {
            endpoint: endpoint.to_string(),
            kind: kind.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Locator, ResourceEndpoint};
    use crate::model::Side;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
        ttl: Duration,
        deny: bool,
    }

    impl CountingBackend {
        fn new(ttl: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                ttl,
                deny: false,
            }
        }
    }

    #[async_trait]
    impl SecretBackend for CountingBackend {
        async fn fetch(&self, request: &CredentialRequest<'_>) -> Result<Credential> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if self.deny {
                return Err(MigrationError::Command {
                    program: "az".into(),
                    status: "exit status: 1".into(),
                    stderr: "AuthorizationFailed".into(),
                });
            }
            let value = match (request.kind, &request.account_key) {
                (CredentialKind::ContainerSas { container }, Some(key)) => {
                    format!("sas-{}-{}", container, key.expose())
                }
                _ => format!("secret-{}", n),
            };
            Ok(Credential::new(Secret::new(value), Utc::now() + self.ttl))
        }
    }

    fn storage_endpoint() -> ResourceEndpoint {
        ResourceEndpoint {
            side: Side::Source,
            subscription: "sub-a".into(),
            locator: Locator::Storage {
                account_name: "stsource".into(),
                resource_group: "rg".into(),
            },
            units: Some(vec!["media".into()]),
        }
    }

    #[tokio::test]
    async fn test_cache_hit_avoids_backend() {
        let backend = Arc::new(CountingBackend::new(Duration::hours(1)));
        let provider = CredentialProvider::new(backend.clone());
        let endpoint = storage_endpoint();

        let first = provider
            .resolve(&endpoint, &CredentialKind::StorageAccountKey)
            .await
            .unwrap();
        let second = provider
            .resolve(&endpoint, &CredentialKind::StorageAccountKey)
            .await
            .unwrap();
        assert_eq!(first.secret, second.secret);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_credential_is_refreshed() {
        // TTL inside the refresh margin: every lookup sees an expired entry.
        let backend = Arc::new(CountingBackend::new(Duration::seconds(10)));
        let provider = CredentialProvider::new(backend.clone());
        let endpoint = storage_endpoint();

        let first = provider
            .resolve(&endpoint, &CredentialKind::StorageAccountKey)
            .await
            .unwrap();
        let second = provider
            .resolve(&endpoint, &CredentialKind::StorageAccountKey)
            .await
            .unwrap();
        assert_ne!(first.secret, second.secret);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_collapse_into_one() {
        let backend = Arc::new(CountingBackend::new(Duration::hours(1)));
        let provider = Arc::new(CredentialProvider::new(backend.clone()));
        let endpoint = Arc::new(storage_endpoint());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let provider = provider.clone();
            let endpoint = endpoint.clone();
            handles.push(tokio::spawn(async move {
                provider
                    .resolve(&endpoint, &CredentialKind::StorageAccountKey)
                    .await
                    .map(|c| c.secret.expose().to_string())
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "secret-1");
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sas_uses_cached_account_key() {
        let backend = Arc::new(CountingBackend::new(Duration::hours(1)));
        let provider = CredentialProvider::new(backend.clone());
        let endpoint = storage_endpoint();

        let sas = provider
            .resolve(
                &endpoint,
                &CredentialKind::ContainerSas {
                    container: "media".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(sas.secret.expose(), "sas-media-secret-1");
        provider
            .resolve(&endpoint, &CredentialKind::StorageAccountKey)
            .await
            .unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_backend_denial_maps_to_credential_unavailable() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
            ttl: Duration::hours(1),
            deny: true,
        });
        let provider = CredentialProvider::new(backend);
        let err = provider
            .resolve(&storage_endpoint(), &CredentialKind::StorageAccountKey)
            .await
            .unwrap_err();
        match err {
            MigrationError::CredentialUnavailable { kind, reason, .. } => {
                assert_eq!(kind, "storage-account-key");
                assert!(reason.contains("AuthorizationFailed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_inline_password_skips_backend() {
        use crate::config::{PasswordSource, PostgresLocator};

        let backend = Arc::new(CountingBackend::new(Duration::hours(1)));
        let provider = CredentialProvider::new(backend.clone());
        let endpoint = ResourceEndpoint {
            side: Side::Target,
            subscription: "sub-b".into(),
            locator: Locator::Postgres(PostgresLocator {
                host: "pg-target".into(),
                port: 5432,
                username: "admin".into(),
                ssl_mode: "require".into(),
                password: PasswordSource::Inline(Secret::new("inline-pw")),
            }),
            units: Some(vec!["orders".into()]),
        };
        let credential = provider
            .resolve(&endpoint, &CredentialKind::DatabasePassword)
            .await
            .unwrap();
        assert_eq!(credential.secret.expose(), "inline-pw");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
