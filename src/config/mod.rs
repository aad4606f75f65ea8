// azmigrate/src/config/mod.rs
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::credentials::Secret;
use crate::diff::DiffPolicy;
use crate::errors::{MigrationError, Result};
use crate::model::{ResourceKind, Side};

static DATABASE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("valid regex"));
static STORAGE_ACCOUNT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{3,24}$").expect("valid regex"));
static CONTAINER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9\-]{1,61}[a-z0-9]$").expect("valid regex"));
static REGISTRY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{5,50}$").expect("valid regex"));

// Structs for deserializing the endpoint JSON documents
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEndpointConfig {
    pub subscription: Option<String>,
    // database
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_vault: Option<String>,
    pub password_secret: Option<String>,
    pub ssl_mode: Option<String>,
    pub databases: Option<Vec<String>>,
    // storage
    pub account_name: Option<String>,
    pub resource_group: Option<String>,
    pub containers: Option<Vec<String>>,
    // registry
    pub registry_name: Option<String>,
    pub repositories: Option<Vec<String>>,
}

/// Where a database password comes from.
#[derive(Debug, Clone)]
pub enum PasswordSource {
    Inline(Secret),
    KeyVault { vault: String, secret_name: String },
}

#[derive(Debug, Clone)]
pub struct PostgresLocator {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub ssl_mode: String,
    pub password: PasswordSource,
}

#[derive(Debug, Clone)]
pub enum Locator {
    Postgres(PostgresLocator),
    Storage {
        account_name: String,
        resource_group: String,
    },
    Registry {
        registry_name: String,
        resource_group: Option<String>,
    },
}

/// One side of a migration. Built once from configuration and never mutated.
#[derive(Debug, Clone)]
pub struct ResourceEndpoint {
    pub side: Side,
    pub subscription: String,
    pub locator: Locator,
    /// Configured databases / containers / repositories. `None` means "all" (registry only).
    pub units: Option<Vec<String>>,
}

impl ResourceEndpoint {
    pub fn kind(&self) -> ResourceKind {
        match self.locator {
            Locator::Postgres(_) => ResourceKind::Database,
            Locator::Storage { .. } => ResourceKind::Storage,
            Locator::Registry { .. } => ResourceKind::Registry,
        }
    }

    /// Host, account or registry name.
    pub fn resource_name(&self) -> &str {
        match &self.locator {
            Locator::Postgres(pg) => &pg.host,
            Locator::Storage { account_name, .. } => account_name,
            Locator::Registry { registry_name, .. } => registry_name,
        }
    }

    /// Stable key used to scope cached credentials.
    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.side, self.subscription, self.resource_name())
    }

    pub fn postgres(&self) -> Result<&PostgresLocator> {
        match &self.locator {
            Locator::Postgres(pg) => Ok(pg),
            _ => Err(MigrationError::Configuration(format!(
                "{} is not a database endpoint",
                self
            ))),
        }
    }
}

impl fmt::Display for ResourceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} '{}' (subscription {})",
            self.side,
            self.kind(),
            self.resource_name(),
            self.subscription
        )
    }
}

/// Named workflows the orchestrator can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Workflow {
    FullMigration,
    IncrementalSync,
    VerifyOnly,
    DiffOnly,
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workflow::FullMigration => write!(f, "full-migration"),
            Workflow::IncrementalSync => write!(f, "incremental-sync"),
            Workflow::VerifyOnly => write!(f, "verify-only"),
            Workflow::DiffOnly => write!(f, "diff-only"),
        }
    }
}

/// Scratch-directory handling for dump files and downloaded blobs.
#[derive(Debug, Clone, Default)]
pub struct ScratchOptions {
    /// Use this directory instead of a fresh timestamped one.
    pub dir_override: Option<PathBuf>,
    /// Root for timestamped scratch directories. Defaults to the system temp dir.
    pub root: Option<PathBuf>,
    /// Reuse intermediate files already present (`--skip-backup` / `--skip-download`).
    pub reuse_existing: bool,
    pub cleanup: bool,
    pub archive: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workflow: Workflow,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub policy: DiffPolicy,
    pub scratch: ScratchOptions,
}

impl RunOptions {
    pub fn new(kind: ResourceKind, workflow: Workflow, policy: DiffPolicy) -> Self {
        Self {
            workflow,
            concurrency: default_concurrency(kind),
            max_attempts: 1,
            backoff_base: Duration::from_secs(2),
            policy,
            scratch: ScratchOptions::default(),
        }
    }
}

/// Dump/restore is heavy on both servers, so databases go one at a time.
pub fn default_concurrency(kind: ResourceKind) -> usize {
    match kind {
        ResourceKind::Database => 1,
        ResourceKind::Storage => 8,
        ResourceKind::Registry => 4,
    }
}

/// Reads and validates one endpoint document.
pub fn load_endpoint(path: &Path, kind: ResourceKind, side: Side) -> Result<ResourceEndpoint> {
    let content = fs::read_to_string(path).map_err(|e| {
        MigrationError::Configuration(format!(
            "Failed to read {} config file at {}: {}",
            side,
            path.display(),
            e
        ))
    })?;
    let raw: RawEndpointConfig = serde_json::from_str(&content).map_err(|e| {
        MigrationError::Configuration(format!(
            "Failed to parse JSON from {} config file at {}: {}",
            side,
            path.display(),
            e
        ))
    })?;
    endpoint_from_raw(raw, kind, side).map_err(|e| match e {
        MigrationError::Configuration(msg) => {
            MigrationError::Configuration(format!("{} ({})", msg, path.display()))
        }
        other => other,
    })
}

pub fn endpoint_from_raw(
    raw: RawEndpointConfig,
    kind: ResourceKind,
    side: Side,
) -> Result<ResourceEndpoint> {
    let subscription = required(&raw.subscription, "subscription")?;

    let (locator, units) = match kind {
        ResourceKind::Database => {
            let password = match (&raw.password, &raw.key_vault, &raw.password_secret) {
                (Some(pw), _, _) if !pw.is_empty() => PasswordSource::Inline(Secret::new(pw.clone())),
                (_, Some(vault), Some(secret)) if !vault.trim().is_empty() && !secret.trim().is_empty() => {
                    PasswordSource::KeyVault {
                        vault: vault.trim().to_string(),
                        secret_name: secret.trim().to_string(),
                    }
                }
                _ => {
                    return Err(MigrationError::Configuration(
                        "either 'password' or both 'key_vault' and 'password_secret' must be set".into(),
                    ));
                }
            };
            let locator = PostgresLocator {
                host: required(&raw.host, "host")?,
                port: raw.port.unwrap_or(5432),
                username: required(&raw.username, "username")?,
                ssl_mode: raw
                    .ssl_mode
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "require".to_string()),
                password,
            };
            let databases = required_list(&raw.databases, "databases")?;
            validate_names(&databases, &DATABASE_NAME, "database")?;
            (Locator::Postgres(locator), Some(databases))
        }
        ResourceKind::Storage => {
            let account_name = required(&raw.account_name, "account_name")?;
            if !STORAGE_ACCOUNT_NAME.is_match(&account_name) {
                return Err(MigrationError::Configuration(format!(
                    "invalid storage account name '{}'",
                    account_name
                )));
            }
            let containers = required_list(&raw.containers, "containers")?;
            validate_names(&containers, &CONTAINER_NAME, "container")?;
            (
                Locator::Storage {
                    account_name,
                    resource_group: required(&raw.resource_group, "resource_group")?,
                },
                Some(containers),
            )
        }
        ResourceKind::Registry => {
            let registry_name = required(&raw.registry_name, "registry_name")?;
            if !REGISTRY_NAME.is_match(&registry_name) {
                return Err(MigrationError::Configuration(format!(
                    "invalid registry name '{}'",
                    registry_name
                )));
            }
            let repositories = raw
                .repositories
                .clone()
                .map(|repos| {
                    repos
                        .into_iter()
                        .map(|r| r.trim().to_string())
                        .filter(|r| !r.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|repos| !repos.is_empty());
            (
                Locator::Registry {
                    registry_name,
                    resource_group: raw.resource_group.clone().filter(|s| !s.trim().is_empty()),
                },
                repositories,
            )
        }
    };

    Ok(ResourceEndpoint {
        side,
        subscription,
        locator,
        units,
    })
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    value
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MigrationError::Configuration(format!("'{}' must be set and non-empty", field)))
}

fn required_list(value: &Option<Vec<String>>, field: &str) -> Result<Vec<String>> {
    let items: Vec<String> = value
        .as_ref()
        .map(|v| {
            v.iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if items.is_empty() {
        return Err(MigrationError::Configuration(format!(
            "'{}' must list at least one entry",
            field
        )));
    }
    Ok(items)
}

fn validate_names(names: &[String], pattern: &Regex, what: &str) -> Result<()> {
    if let Some(bad) = names.iter().find(|n| !pattern.is_match(n)) {
        return Err(MigrationError::Configuration(format!(
            "invalid {} name '{}'",
            what, bad
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn raw(value: serde_json::Value) -> RawEndpointConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_database_endpoint_with_key_vault() {
        let endpoint = endpoint_from_raw(
            raw(json!({
                "subscription": "1111-2222",
                "host": "pg-source.postgres.database.azure.com",
                "username": "migrator",
                "key_vault": "kv-source",
                "password_secret": "pg-admin",
                "databases": ["orders", "billing"]
            })),
            ResourceKind::Database,
            Side::Source,
        )
        .unwrap();

        assert_eq!(endpoint.kind(), ResourceKind::Database);
        let pg = endpoint.postgres().unwrap();
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.ssl_mode, "require");
        assert!(matches!(pg.password, PasswordSource::KeyVault { .. }));
        assert_eq!(
            endpoint.units,
            Some(vec!["orders".to_string(), "billing".to_string()])
        );
    }

    #[test]
    fn test_database_endpoint_requires_password_source() {
        let err = endpoint_from_raw(
            raw(json!({
                "subscription": "s",
                "host": "h",
                "username": "u",
                "databases": ["a"]
            })),
            ResourceKind::Database,
            Side::Target,
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
    }

    #[test]
    fn test_storage_endpoint_requires_containers() {
        let err = endpoint_from_raw(
            raw(json!({
                "subscription": "s",
                "account_name": "stsource01",
                "resource_group": "rg",
                "containers": []
            })),
            ResourceKind::Storage,
            Side::Source,
        )
        .unwrap_err();
        assert!(err.to_string().contains("containers"));
    }

    #[test]
    fn test_storage_account_name_is_validated() {
        let err = endpoint_from_raw(
            raw(json!({
                "subscription": "s",
                "account_name": "Not_Valid",
                "resource_group": "rg",
                "containers": ["media"]
            })),
            ResourceKind::Storage,
            Side::Source,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Not_Valid"));
    }

    #[test]
    fn test_registry_repositories_are_optional() {
        let endpoint = endpoint_from_raw(
            raw(json!({
                "subscription": "s",
                "registry_name": "acrsource01",
                "repositories": []
            })),
            ResourceKind::Registry,
            Side::Source,
        )
        .unwrap();
        assert_eq!(endpoint.units, None);
        assert_eq!(endpoint.resource_name(), "acrsource01");
    }

    #[test]
    fn test_inline_password_is_not_printed() {
        let endpoint = endpoint_from_raw(
            raw(json!({
                "subscription": "s",
                "host": "h",
                "username": "u",
                "password": "hunter2",
                "databases": ["a"]
            })),
            ResourceKind::Database,
            Side::Source,
        )
        .unwrap();
        assert!(!format!("{:?}", endpoint).contains("hunter2"));
    }

    #[test]
    fn test_load_endpoint_reports_file_on_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"subscription\": \"s\"}}").unwrap();
        let err = load_endpoint(file.path(), ResourceKind::Registry, Side::Target).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("registry_name"));
        assert!(message.contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_load_endpoint_rejects_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = load_endpoint(file.path(), ResourceKind::Storage, Side::Source).unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
    }
}
