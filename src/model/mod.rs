// azmigrate/src/model/mod.rs
pub(crate) mod plan;
pub(crate) mod report;

pub use plan::{PlannedUnit, SelectionReason, TransferPlan};
pub use report::{MigrationReport, ReportCounts, TransferResult, TransferStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three kinds of Azure resources the tool knows how to migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Database,
    Storage,
    Registry,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Database => write!(f, "database"),
            ResourceKind::Storage => write!(f, "storage"),
            ResourceKind::Registry => write!(f, "registry"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// Identity of a migratable item. Two units are the same unit iff their identity strings match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum UnitKey {
    Database(String),
    Container(String),
    Blob { container: String, name: String },
    Repository(String),
    Image { repository: String, tag: String },
}

impl UnitKey {
    pub fn identity(&self) -> String {
        match self {
            UnitKey::Database(name) => format!("db:{}", name),
            UnitKey::Container(name) => format!("container:{}", name),
            UnitKey::Blob { container, name } => format!("blob:{}/{}", container, name),
            UnitKey::Repository(name) => format!("repo:{}", name),
            UnitKey::Image { repository, tag } => format!("image:{}:{}", repository, tag),
        }
    }

    /// The collection (database, container or repository) this unit belongs to.
    pub fn collection(&self) -> &str {
        match self {
            UnitKey::Database(name) | UnitKey::Container(name) | UnitKey::Repository(name) => name,
            UnitKey::Blob { container, .. } => container,
            UnitKey::Image { repository, .. } => repository,
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

/// Marker used to decide whether a target copy is behind its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Freshness {
    Timestamp(DateTime<Utc>),
    RowCount(u64),
    Digest(String),
}

impl Freshness {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Freshness::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationUnit {
    pub key: UnitKey,
    pub freshness: Option<Freshness>,
    pub size_bytes: Option<u64>,
    pub digest: Option<String>,
}

impl MigrationUnit {
    pub fn new(key: UnitKey) -> Self {
        Self {
            key,
            freshness: None,
            size_bytes: None,
            digest: None,
        }
    }

    pub fn database(name: impl Into<String>) -> Self {
        Self::new(UnitKey::Database(name.into()))
    }

    pub fn container(name: impl Into<String>) -> Self {
        Self::new(UnitKey::Container(name.into()))
    }

    pub fn repository(name: impl Into<String>) -> Self {
        Self::new(UnitKey::Repository(name.into()))
    }

    pub fn blob(
        container: impl Into<String>,
        name: impl Into<String>,
        last_modified: Option<DateTime<Utc>>,
        size_bytes: Option<u64>,
    ) -> Self {
        Self {
            key: UnitKey::Blob {
                container: container.into(),
                name: name.into(),
            },
            freshness: last_modified.map(Freshness::Timestamp),
            size_bytes,
            digest: None,
        }
    }

    pub fn image(
        repository: impl Into<String>,
        tag: impl Into<String>,
        last_updated: Option<DateTime<Utc>>,
        digest: Option<String>,
    ) -> Self {
        Self {
            key: UnitKey::Image {
                repository: repository.into(),
                tag: tag.into(),
            },
            freshness: last_updated
                .map(Freshness::Timestamp)
                .or_else(|| digest.clone().map(Freshness::Digest)),
            size_bytes: None,
            digest,
        }
    }

    pub fn identity(&self) -> String {
        self.key.identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_strings() {
        assert_eq!(MigrationUnit::database("orders").identity(), "db:orders");
        assert_eq!(
            MigrationUnit::blob("media", "2024/a.png", None, Some(3)).identity(),
            "blob:media/2024/a.png"
        );
        assert_eq!(
            MigrationUnit::image("api", "v1.2", None, None).identity(),
            "image:api:v1.2"
        );
    }

    #[test]
    fn test_collection_of_nested_units() {
        let blob = MigrationUnit::blob("media", "x.bin", None, None);
        assert_eq!(blob.key.collection(), "media");
        let image = MigrationUnit::image("web/frontend", "latest", None, None);
        assert_eq!(image.key.collection(), "web/frontend");
    }
}
