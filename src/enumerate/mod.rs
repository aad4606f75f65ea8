// azmigrate/src/enumerate/mod.rs
pub(crate) mod blob;
pub(crate) mod postgres;
pub(crate) mod registry;

pub use blob::BlobEnumerator;
pub use postgres::PostgresEnumerator;
pub use registry::RegistryEnumerator;

use async_trait::async_trait;

use crate::config::ResourceEndpoint;
use crate::errors::Result;
use crate::model::MigrationUnit;

/// Restricts enumeration to named databases, containers or repositories.
#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    /// `None` means every collection on the endpoint.
    pub collections: Option<Vec<String>>,
}

impl UnitFilter {
    pub fn from_endpoint(endpoint: &ResourceEndpoint) -> Self {
        Self {
            collections: endpoint.units.clone(),
        }
    }
}

/// Lists migratable units on one endpoint.
///
/// Every call re-reads live state; nothing is cached between calls, so the same
/// enumerator can be asked again after a transfer batch.
#[async_trait]
pub trait ResourceEnumerator: Send + Sync {
    /// Transfer units (databases, blobs or image tags).
    async fn list(&self, endpoint: &ResourceEndpoint, filter: &UnitFilter) -> Result<Vec<MigrationUnit>>;

    /// Verification units (databases, containers or repositories).
    async fn list_collections(
        &self,
        endpoint: &ResourceEndpoint,
        filter: &UnitFilter,
    ) -> Result<Vec<MigrationUnit>>;
}
