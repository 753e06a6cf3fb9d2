use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::{CatalogEntity, CatalogEntityId, EntityKind};

/// Authoritative catalog rows. `(kind, normalized name)` is unique.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn get(&self, id: CatalogEntityId) -> Result<Option<CatalogEntity>, RepositoryError>;

    async fn find_by_name(
        &self,
        kind: EntityKind,
        normalized_name: &str,
    ) -> Result<Option<CatalogEntity>, RepositoryError>;

    /// Inserts unless an entity with the same key exists. Concurrent callers
    /// with the same key all receive the single surviving row; the flag is
    /// true only for the caller whose insert won.
    async fn create_or_get(
        &self,
        entity: &CatalogEntity,
    ) -> Result<(CatalogEntity, bool), RepositoryError>;

    async fn update(&self, entity: &CatalogEntity) -> Result<(), RepositoryError>;

    async fn list(&self, kind: EntityKind) -> Result<Vec<CatalogEntity>, RepositoryError>;
}
