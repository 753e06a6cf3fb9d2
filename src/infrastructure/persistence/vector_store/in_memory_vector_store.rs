use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::ports::{
    CatalogIndex, CollectionConfig, EntityMatch, SearchResult, VectorStore, VectorStoreError,
};
use crate::domain::{
    CatalogEntity, CatalogEntityId, Chunk, ChunkId, DocumentId, Embedding, EntityKind,
};

/// Descending score; ties broken by id so results are reproducible.
fn by_score_then_id<K: Ord>(a: (f32, K), b: (f32, K)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
}

/// Brute-force cosine search over chunks held in memory.
#[derive(Default)]
pub struct InMemoryVectorStore {
    points: RwLock<HashMap<ChunkId, (Chunk, Embedding)>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, _config: &CollectionConfig) -> Result<bool, VectorStoreError> {
        Ok(false)
    }

    async fn collection_exists(&self) -> Result<bool, VectorStoreError> {
        Ok(true)
    }

    async fn upsert(
        &self,
        chunks: &[Chunk],
        embeddings: &[Embedding],
    ) -> Result<(), VectorStoreError> {
        if chunks.len() != embeddings.len() {
            return Err(VectorStoreError::UpsertFailed(
                "chunks and embeddings count mismatch".to_string(),
            ));
        }
        let mut points = self.points.write().await;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            points.insert(chunk.id, (chunk.clone(), embedding.clone()));
        }
        Ok(())
    }

    async fn search(
        &self,
        embedding: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, VectorStoreError> {
        let points = self.points.read().await;
        let mut scored: Vec<SearchResult> = points
            .values()
            .map(|(chunk, stored)| SearchResult {
                chunk: chunk.clone(),
                score: embedding.cosine_similarity(stored),
            })
            .collect();
        scored.sort_by(|a, b| {
            by_score_then_id(
                (a.score, a.chunk.id.as_uuid()),
                (b.score, b.chunk.id.as_uuid()),
            )
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_stale(
        &self,
        source: &str,
        current: DocumentId,
    ) -> Result<(), VectorStoreError> {
        self.points.write().await.retain(|_, (chunk, _)| {
            chunk.provenance.source != source || chunk.document_id == current
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCatalogIndex {
    vectors: RwLock<HashMap<CatalogEntityId, (EntityKind, Embedding)>>,
}

impl InMemoryCatalogIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogIndex for InMemoryCatalogIndex {
    async fn ensure_collection(&self, _config: &CollectionConfig) -> Result<bool, VectorStoreError> {
        Ok(false)
    }

    async fn upsert(
        &self,
        entity: &CatalogEntity,
        embedding: &Embedding,
    ) -> Result<(), VectorStoreError> {
        self.vectors
            .write()
            .await
            .insert(entity.id, (entity.kind, embedding.clone()));
        Ok(())
    }

    async fn nearest(
        &self,
        kind: EntityKind,
        embedding: &Embedding,
        top_k: usize,
    ) -> Result<Vec<EntityMatch>, VectorStoreError> {
        let vectors = self.vectors.read().await;
        let mut matches: Vec<EntityMatch> = vectors
            .iter()
            .filter(|(_, (entity_kind, _))| *entity_kind == kind)
            .map(|(id, (_, stored))| EntityMatch {
                entity_id: *id,
                score: embedding.cosine_similarity(stored),
            })
            .collect();
        matches.sort_by(|a, b| by_score_then_id((a.score, a.entity_id), (b.score, b.entity_id)));
        matches.truncate(top_k);
        Ok(matches)
    }
}
