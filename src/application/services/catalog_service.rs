use std::sync::Arc;

use super::retry::{CallError, RetryPolicy};
use crate::application::ports::{
    CatalogIndex, CatalogRepository, Embedder, EmbedderError, RepositoryError, VectorStoreError,
};
use crate::domain::{CatalogEntity, CatalogEntityId, EntityKind, content_hash};

/// Owns catalog writes and keeps the similarity index in step with them:
/// an entity is (re)embedded whenever it is created or its text changes.
pub struct CatalogService {
    repository: Arc<dyn CatalogRepository>,
    index: Arc<dyn CatalogIndex>,
    embedder: Arc<dyn Embedder>,
    retry: RetryPolicy,
}

impl CatalogService {
    pub fn new(
        repository: Arc<dyn CatalogRepository>,
        index: Arc<dyn CatalogIndex>,
        embedder: Arc<dyn Embedder>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repository,
            index,
            embedder,
            retry,
        }
    }

    /// Returns the entity for `(kind, name)`, inserting it when absent.
    /// Concurrent callers with the same key converge on one row.
    pub async fn create_or_get(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> Result<(CatalogEntity, bool), CatalogError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CatalogError::EmptyName);
        }

        let candidate = CatalogEntity::new(kind, name, None);
        let (entity, created) = self.repository.create_or_get(&candidate).await?;
        if created {
            tracing::info!(entity_id = %entity.id, kind = %kind, name = %entity.name, "Catalog entity created");
            self.index_or_warn(&entity).await;
        }
        Ok((entity, created))
    }

    pub async fn get(&self, id: CatalogEntityId) -> Result<Option<CatalogEntity>, CatalogError> {
        Ok(self.repository.get(id).await?)
    }

    pub async fn list(&self, kind: EntityKind) -> Result<Vec<CatalogEntity>, CatalogError> {
        Ok(self.repository.list(kind).await?)
    }

    /// Administrative write: stores the entity's text and re-embeds it when
    /// the content hash moved. The row only takes the new hash once the new
    /// vector is indexed, so a failed re-embed is retried by the next call.
    pub async fn upsert_entity(
        &self,
        kind: EntityKind,
        name: &str,
        description: Option<String>,
    ) -> Result<CatalogEntity, CatalogError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CatalogError::EmptyName);
        }
        let description = description.filter(|d| !d.trim().is_empty());

        let candidate = CatalogEntity::new(kind, name, description.clone());
        let (mut entity, created) = self.repository.create_or_get(&candidate).await?;
        if created {
            self.index_entity(&entity).await?;
            tracing::info!(entity_id = %entity.id, kind = %kind, "Catalog entity created");
            return Ok(entity);
        }

        let new_hash = content_hash(name, description.as_deref());
        if !entity.is_embedding_stale(&new_hash) {
            return Ok(entity);
        }

        entity.name = name.to_string();
        entity.description = description;
        entity.content_hash = new_hash;
        entity.updated_at = chrono::Utc::now();
        self.index_entity(&entity).await?;
        self.repository.update(&entity).await?;
        tracing::info!(entity_id = %entity.id, "Catalog entity re-embedded after edit");
        Ok(entity)
    }

    /// Re-embeds every entity of `kind`; used to rebuild the index.
    pub async fn reindex(&self, kind: EntityKind) -> Result<usize, CatalogError> {
        let entities = self.repository.list(kind).await?;
        for entity in &entities {
            self.index_entity(entity).await?;
        }
        tracing::info!(kind = %kind, count = entities.len(), "Catalog kind reindexed");
        Ok(entities.len())
    }

    async fn index_entity(&self, entity: &CatalogEntity) -> Result<(), CatalogError> {
        let text = entity.embedding_text();
        let embedding = self
            .retry
            .call("catalog_embed", || self.embedder.embed(&text))
            .await
            .map_err(CatalogError::Embedding)?;
        self.retry
            .call("catalog_index_upsert", || self.index.upsert(entity, &embedding))
            .await
            .map_err(CatalogError::Index)?;
        Ok(())
    }

    /// The row is the source of truth; a missing vector only degrades
    /// resolution to exact-name lookup until the next reindex.
    async fn index_or_warn(&self, entity: &CatalogEntity) {
        if let Err(e) = self.index_entity(entity).await {
            tracing::warn!(entity_id = %entity.id, error = %e, "Catalog entity stored but not indexed");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog entity name is empty")]
    EmptyName,
    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),
    #[error("embedding: {0}")]
    Embedding(CallError<EmbedderError>),
    #[error("index: {0}")]
    Index(CallError<VectorStoreError>),
}
