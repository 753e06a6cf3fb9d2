use std::str::FromStr;

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::api_error::ApiError;
use super::identity::AuthenticatedUser;
use crate::domain::{CatalogEntity, EntityKind};
use crate::presentation::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpsertEntityRequest {
    pub kind: EntityKind,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KindQuery {
    pub kind: String,
}

#[derive(Serialize)]
pub struct ReindexResponse {
    pub kind: EntityKind,
    pub reindexed: usize,
}

fn parse_kind(raw: &str) -> Result<EntityKind, ApiError> {
    EntityKind::from_str(raw.trim()).map_err(ApiError::bad_request)
}

/// Creates or edits a catalog entity; an edit that changes its text
/// re-embeds it.
#[tracing::instrument(skip(state, request), fields(kind = %request.kind))]
pub async fn upsert_entity_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<UpsertEntityRequest>,
) -> Result<Json<CatalogEntity>, ApiError> {
    user.require_admin()?;
    let entity = state
        .catalog_service
        .upsert_entity(request.kind, &request.name, request.description)
        .await?;
    Ok(Json(entity))
}

pub async fn list_entities_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<KindQuery>,
) -> Result<Json<Vec<CatalogEntity>>, ApiError> {
    user.require_admin()?;
    let kind = parse_kind(&query.kind)?;
    Ok(Json(state.catalog_service.list(kind).await?))
}

#[tracing::instrument(skip(state))]
pub async fn reindex_catalog_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<KindQuery>,
) -> Result<Json<ReindexResponse>, ApiError> {
    user.require_admin()?;
    let kind = parse_kind(&query.kind)?;
    let reindexed = state.catalog_service.reindex(kind).await?;
    Ok(Json(ReindexResponse { kind, reindexed }))
}
