use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use super::api_error::ApiError;
use super::identity::AuthenticatedUser;
use crate::application::ports::CollectionConfig;
use crate::application::services::{IndexReport, SourceDocument};
use crate::presentation::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IndexKnowledgeRequest {
    pub documents: Vec<SourceDocument>,
}

/// Adds documentation to the knowledge base. Administrators only.
#[tracing::instrument(skip(state, request), fields(documents = request.documents.len()))]
pub async fn index_knowledge_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<IndexKnowledgeRequest>,
) -> Result<Json<IndexReport>, ApiError> {
    user.require_admin()?;
    if request.documents.is_empty() {
        return Err(ApiError::bad_request("no documents to index"));
    }

    let collection = CollectionConfig::for_chunks(state.settings.embeddings.dimension as u64);
    let report = state
        .retrieval_service
        .index(&request.documents, &collection)
        .await?;
    Ok(Json(report))
}
