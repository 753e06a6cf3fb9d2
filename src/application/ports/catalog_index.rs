use async_trait::async_trait;

use super::{CollectionConfig, EntityMatch, VectorStoreError};
use crate::domain::{CatalogEntity, Embedding, EntityKind};

/// Nearest-neighbour index over catalog entity embeddings. Safe for
/// concurrent reads; writes happen only on catalog changes.
#[async_trait]
pub trait CatalogIndex: Send + Sync {
    async fn ensure_collection(&self, config: &CollectionConfig) -> Result<bool, VectorStoreError>;

    async fn upsert(
        &self,
        entity: &CatalogEntity,
        embedding: &Embedding,
    ) -> Result<(), VectorStoreError>;

    /// Top matches restricted to `kind`, by descending cosine similarity.
    async fn nearest(
        &self,
        kind: EntityKind,
        embedding: &Embedding,
        top_k: usize,
    ) -> Result<Vec<EntityMatch>, VectorStoreError>;
}
