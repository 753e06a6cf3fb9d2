use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, DeletePointsBuilder, Filter, PointId, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::qdrant_support::{ensure_collection, point_uuid};
use crate::application::ports::{CollectionConfig, SearchResult, VectorStore, VectorStoreError};
use crate::domain::{Chunk, ChunkId, DocumentId, Embedding, Provenance};

/// Knowledge-base chunks in a Qdrant collection. Provenance travels in the
/// point payload so a hit can be cited without a second lookup.
pub struct QdrantAdapter {
    client: Arc<Qdrant>,
    collection_name: String,
}

impl QdrantAdapter {
    pub fn new(url: &str, collection_name: String) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self::with_client(Arc::new(client), collection_name))
    }

    pub fn with_client(client: Arc<Qdrant>, collection_name: String) -> Self {
        Self {
            client,
            collection_name,
        }
    }

    fn chunk_payload(chunk: &Chunk) -> HashMap<String, serde_json::Value> {
        let mut payload = HashMap::new();
        payload.insert(
            "document_id".to_string(),
            serde_json::Value::String(chunk.document_id.as_uuid().to_string()),
        );
        payload.insert("text".to_string(), serde_json::Value::String(chunk.text.clone()));
        payload.insert(
            "source".to_string(),
            serde_json::Value::String(chunk.provenance.source.clone()),
        );
        payload.insert(
            "title".to_string(),
            serde_json::Value::String(chunk.provenance.title.clone()),
        );
        payload.insert(
            "section".to_string(),
            chunk
                .provenance
                .section
                .clone()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        );
        payload.insert(
            "offset".to_string(),
            serde_json::Value::Number((chunk.offset as u64).into()),
        );
        payload
    }
}

#[async_trait]
impl VectorStore for QdrantAdapter {
    #[instrument(skip(self, config), fields(collection = %self.collection_name))]
    async fn create_collection(&self, config: &CollectionConfig) -> Result<bool, VectorStoreError> {
        ensure_collection(&self.client, &self.collection_name, config).await
    }

    #[instrument(skip(self), fields(collection = %self.collection_name))]
    async fn collection_exists(&self) -> Result<bool, VectorStoreError> {
        self.client
            .collection_exists(&self.collection_name)
            .await
            .map_err(|e| VectorStoreError::ConnectionFailed(e.to_string()))
    }

    #[instrument(skip(self, chunks, embeddings), fields(collection = %self.collection_name, count = chunks.len()))]
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
        if chunks.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                PointStruct::new(
                    PointId::from(chunk.id.as_uuid().to_string()),
                    embedding.values.clone(),
                    Self::chunk_payload(chunk),
                )
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points).wait(true))
            .await
            .map_err(|e| VectorStoreError::UpsertFailed(e.to_string()))?;

        info!(collection = %self.collection_name, count = chunks.len(), "points_upserted");
        Ok(())
    }

    #[instrument(skip(self, embedding), fields(collection = %self.collection_name, top_k = top_k))]
    async fn search(
        &self,
        embedding: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, VectorStoreError> {
        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(
                    &self.collection_name,
                    embedding.values.clone(),
                    top_k as u64,
                )
                .with_payload(true),
            )
            .await
            .map_err(|e| VectorStoreError::SearchFailed(e.to_string()))?;

        let results = search_result
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload;
                let chunk_id = point_uuid(point.id?.point_id_options?)?;
                let document_id = Uuid::parse_str(payload.get("document_id")?.as_str()?).ok()?;

                let provenance = Provenance {
                    source: payload.get("source")?.as_str()?.to_string(),
                    title: payload.get("title")?.as_str()?.to_string(),
                    section: payload
                        .get("section")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                };

                let chunk = Chunk {
                    id: ChunkId::from_uuid(chunk_id),
                    text: payload.get("text")?.as_str()?.to_string(),
                    document_id: DocumentId::from_uuid(document_id),
                    provenance,
                    offset: payload.get("offset")?.as_integer()? as usize,
                };

                Some(SearchResult {
                    chunk,
                    score: point.score,
                })
            })
            .collect();

        Ok(results)
    }

    #[instrument(skip(self), fields(collection = %self.collection_name, document_id = %current.as_uuid()))]
    async fn delete_stale(
        &self,
        source: &str,
        current: DocumentId,
    ) -> Result<(), VectorStoreError> {
        if !self.collection_exists().await? {
            return Ok(());
        }

        let stale = Filter {
            must: vec![Condition::matches("source", source.to_string())],
            must_not: vec![Condition::matches(
                "document_id",
                current.as_uuid().to_string(),
            )],
            ..Default::default()
        };
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(stale)
                    .wait(true),
            )
            .await
            .map_err(|e| VectorStoreError::DeleteFailed(e.to_string()))?;

        info!(collection = %self.collection_name, source = %source, "stale_source_chunks_deleted");
        Ok(())
    }
}
