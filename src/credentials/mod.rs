// azmigrate/src/credentials/mod.rs
pub(crate) mod az_backend;
pub(crate) mod provider;
pub(crate) mod secret;

pub use az_backend::AzSecretBackend;
pub use provider::CredentialProvider;
pub use secret::Secret;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::config::{Locator, PasswordSource, ResourceEndpoint};
use crate::errors::Result;
use crate::model::Side;

/// What a credential is for. Cache entries are keyed by (endpoint, kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    DatabasePassword,
    StorageAccountKey,
    ContainerSas { container: String },
    RegistryPassword,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::DatabasePassword => write!(f, "database-password"),
            CredentialKind::StorageAccountKey => write!(f, "storage-account-key"),
            CredentialKind::ContainerSas { container } => write!(f, "container-sas:{}", container),
            CredentialKind::RegistryPassword => write!(f, "registry-password"),
        }
    }
}

/// A short-lived secret. Lives in the provider's cache; callers get transient clones.
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: Option<String>,
    pub secret: Secret,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(secret: Secret, expires_at: DateTime<Utc>) -> Self {
        Self {
            username: None,
            secret,
            expires_at,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn is_valid_at(&self, instant: DateTime<Utc>) -> bool {
        self.expires_at > instant
    }
}

/// Everything a backend needs to mint one credential.
#[derive(Debug)]
pub struct CredentialRequest<'a> {
    pub endpoint: &'a ResourceEndpoint,
    pub kind: &'a CredentialKind,
    /// Account key, resolved beforehand for SAS generation.
    pub account_key: Option<Secret>,
}

/// Secret store the provider fetches from on cache miss or expiry.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    async fn fetch(&self, request: &CredentialRequest<'_>) -> Result<Credential>;
}

/// Credentials that must resolve before any remote enumeration starts.
pub fn required_credentials(endpoint: &ResourceEndpoint) -> Vec<CredentialKind> {
    match &endpoint.locator {
        Locator::Postgres(pg) => match pg.password {
            PasswordSource::Inline(_) => Vec::new(),
            PasswordSource::KeyVault { .. } => vec![CredentialKind::DatabasePassword],
        },
        Locator::Storage { .. } => vec![CredentialKind::StorageAccountKey],
        // The target side imports using the caller's own az login.
        Locator::Registry { .. } => match endpoint.side {
            Side::Source => vec![CredentialKind::RegistryPassword],
            Side::Target => Vec::new(),
        },
    }
}
