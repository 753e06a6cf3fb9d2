use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Distance, FieldType,
    VectorParamsBuilder, VectorsConfig,
};
use tracing::info;
use uuid::Uuid;

use crate::application::ports::{CollectionConfig, VectorStoreError};

/// Creates the collection and its payload indexes unless it already exists.
/// Returns whether it was created.
pub(super) async fn ensure_collection(
    client: &Qdrant,
    collection_name: &str,
    config: &CollectionConfig,
) -> Result<bool, VectorStoreError> {
    let exists = client
        .collection_exists(collection_name)
        .await
        .map_err(|e| VectorStoreError::ConnectionFailed(e.to_string()))?;
    if exists {
        info!(collection = %collection_name, "collection already exists");
        return Ok(false);
    }

    let vectors_config = VectorsConfig::from(VectorParamsBuilder::new(
        config.vector_dimensions,
        Distance::Cosine,
    ));

    client
        .create_collection(
            CreateCollectionBuilder::new(collection_name).vectors_config(vectors_config),
        )
        .await
        .map_err(|e| VectorStoreError::CollectionCreationFailed(e.to_string()))?;

    info!(collection = %collection_name, "collection_created");

    for field in &config.keyword_fields {
        client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                collection_name,
                *field,
                FieldType::Keyword,
            ))
            .await
            .map_err(|e| VectorStoreError::PayloadIndexFailed(e.to_string()))?;

        info!(collection = %collection_name, field = %field, "payload_index_applied");
    }

    Ok(true)
}

pub(super) fn point_uuid(options: PointIdOptions) -> Option<Uuid> {
    match options {
        PointIdOptions::Uuid(uuid) => Uuid::parse_str(&uuid).ok(),
        PointIdOptions::Num(_) => None,
    }
}
