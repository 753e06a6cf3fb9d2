use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, Filter, PointId, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
};
use tracing::instrument;

use super::qdrant_support::{ensure_collection, point_uuid};
use crate::application::ports::{CatalogIndex, CollectionConfig, EntityMatch, VectorStoreError};
use crate::domain::{CatalogEntity, CatalogEntityId, Embedding, EntityKind};

/// Catalog entity vectors, one point per entity keyed by the entity id.
pub struct QdrantCatalogIndex {
    client: Arc<Qdrant>,
    collection_name: String,
}

impl QdrantCatalogIndex {
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
}

#[async_trait]
impl CatalogIndex for QdrantCatalogIndex {
    #[instrument(skip(self, config), fields(collection = %self.collection_name))]
    async fn ensure_collection(&self, config: &CollectionConfig) -> Result<bool, VectorStoreError> {
        ensure_collection(&self.client, &self.collection_name, config).await
    }

    #[instrument(skip(self, entity, embedding), fields(collection = %self.collection_name, entity_id = %entity.id, kind = %entity.kind))]
    async fn upsert(
        &self,
        entity: &CatalogEntity,
        embedding: &Embedding,
    ) -> Result<(), VectorStoreError> {
        let mut payload: HashMap<String, serde_json::Value> = HashMap::new();
        payload.insert(
            "entity_id".to_string(),
            serde_json::Value::String(entity.id.to_string()),
        );
        payload.insert(
            "kind".to_string(),
            serde_json::Value::String(entity.kind.as_str().to_string()),
        );
        payload.insert("name".to_string(), serde_json::Value::String(entity.name.clone()));
        payload.insert(
            "content_hash".to_string(),
            serde_json::Value::String(entity.content_hash.clone()),
        );

        let point = PointStruct::new(
            PointId::from(entity.id.as_uuid().to_string()),
            embedding.values.clone(),
            payload,
        );

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, vec![point]).wait(true))
            .await
            .map_err(|e| VectorStoreError::UpsertFailed(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, embedding), fields(collection = %self.collection_name, kind = %kind, top_k = top_k))]
    async fn nearest(
        &self,
        kind: EntityKind,
        embedding: &Embedding,
        top_k: usize,
    ) -> Result<Vec<EntityMatch>, VectorStoreError> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(
                    &self.collection_name,
                    embedding.values.clone(),
                    top_k as u64,
                )
                .filter(Filter::must([Condition::matches(
                    "kind",
                    kind.as_str().to_string(),
                )])),
            )
            .await
            .map_err(|e| VectorStoreError::SearchFailed(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point_uuid(point.id?.point_id_options?)?;
                Some(EntityMatch {
                    entity_id: CatalogEntityId::from_uuid(id),
                    score: point.score,
                })
            })
            .collect())
    }
}
