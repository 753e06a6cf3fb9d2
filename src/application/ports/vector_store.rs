use async_trait::async_trait;

use super::{CollectionConfig, SearchResult, VectorStoreError};
use crate::domain::{Chunk, DocumentId, Embedding};

/// Knowledge-base chunks keyed by their provenance source. Re-indexing
/// writes a source's new chunks under a fresh document id, then drops the
/// chunks left from earlier passes.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Returns whether the collection had to be created.
    async fn create_collection(&self, config: &CollectionConfig) -> Result<bool, VectorStoreError>;

    async fn collection_exists(&self) -> Result<bool, VectorStoreError>;

    /// `chunks[i]` is stored with `embeddings[i]`.
    async fn upsert(
        &self,
        chunks: &[Chunk],
        embeddings: &[Embedding],
    ) -> Result<(), VectorStoreError>;

    /// Results ordered by descending cosine similarity.
    async fn search(
        &self,
        embedding: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, VectorStoreError>;

    /// Drops every chunk of `source` whose document id is not `current`.
    async fn delete_stale(&self, source: &str, current: DocumentId) -> Result<(), VectorStoreError>;
}
