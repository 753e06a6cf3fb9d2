use std::str::FromStr;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::api_error::ApiError;
use super::event_stream::{ReplayQuery, sse_response};
use super::identity::AuthenticatedUser;
use crate::application::ports::{JobFilter, Pagination};
use crate::application::services::ExtractionMessage;
use crate::domain::{
    ContentType, DocumentRef, Job, JobFailure, JobId, JobStage, JobStatus,
};
use crate::presentation::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub handle: String,
    pub mime_type: String,
    pub filename: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub is_read: Option<bool>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Serialize)]
pub struct JobResponse {
    pub id: JobId,
    pub status: JobStatus,
    pub stage: JobStage,
    pub stage_label: &'static str,
    pub progress: u8,
    pub document: DocumentRef,
    pub result: Option<serde_json::Value>,
    pub error: Option<JobFailure>,
    pub error_summary: Option<String>,
    pub is_read: bool,
    pub abandon_requested: bool,
    pub reprocessed_from: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            stage: job.stage,
            stage_label: job.stage.label(),
            progress: job.progress,
            error_summary: job.error.as_ref().map(JobFailure::summary),
            document: job.document,
            result: job.result,
            error: job.error,
            is_read: job.is_read,
            abandon_requested: job.abandon_requested,
            reprocessed_from: job.reprocessed_from,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Serialize)]
pub struct JobListResponse {
    pub items: Vec<JobResponse>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Serialize)]
pub struct UnreadCountResponse {
    pub unread: u64,
}

#[tracing::instrument(skip(state, request), fields(user_id = %user.0.user_id))]
pub async fn create_job_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.handle.trim().is_empty() {
        return Err(ApiError::bad_request("document handle is required"));
    }
    if ContentType::from_mime(&request.mime_type).is_none() {
        return Err(ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            format!("Unsupported content type: {}", request.mime_type),
        ));
    }

    let mut document = DocumentRef::new(request.handle.trim(), request.mime_type);
    document.filename = request.filename;

    let job = state.ledger.create(user.0.user_id, document).await?;
    enqueue(&state, job.id).await;

    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(job))))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0.user_id))]
pub async fn list_jobs_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()
        .map_err(ApiError::bad_request)?;
    let filter = JobFilter {
        status,
        is_read: query.is_read,
        created_after: query.created_after,
        created_before: query.created_before,
    };
    let defaults = Pagination::default();
    let pagination = Pagination::new(
        query.page.unwrap_or(defaults.page),
        query.per_page.unwrap_or(defaults.per_page),
    );

    let page = state
        .ledger
        .list_for_user(user.0.user_id, &filter, pagination)
        .await?;

    Ok(Json(JobListResponse {
        items: page.items.into_iter().map(JobResponse::from).collect(),
        total: page.total,
        page: page.page,
        per_page: page.per_page,
    }))
}

pub async fn get_job_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .ledger
        .get_for_user(JobId::from_uuid(job_id), user.0.user_id)
        .await?;
    Ok(Json(job.into()))
}

pub async fn job_events_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(job_id): Path<Uuid>,
    Query(replay): Query<ReplayQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state
        .ledger
        .subscribe(
            JobId::from_uuid(job_id),
            user.0.user_id,
            replay.resolve(&headers),
        )
        .await?;
    Ok(sse_response(
        subscription,
        Duration::from_secs(state.settings.streaming.keep_alive_secs),
    ))
}

pub async fn mark_job_read_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .ledger
        .mark_read(JobId::from_uuid(job_id), user.0.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unread_count_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let unread = state.ledger.unread_count(user.0.user_id).await?;
    Ok(Json(UnreadCountResponse { unread }))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0.user_id))]
pub async fn reprocess_job_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .ledger
        .reprocess(JobId::from_uuid(job_id), user.0.user_id)
        .await?;
    enqueue(&state, job.id).await;
    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(job))))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0.user_id))]
pub async fn abandon_job_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .ledger
        .request_abandon(JobId::from_uuid(job_id), user.0.user_id)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// A job that misses the queue stays pending and is picked up by the
/// recovery pass on the next worker start.
async fn enqueue(state: &AppState, job_id: JobId) {
    if let Err(e) = state
        .extraction_sender
        .send(ExtractionMessage { job_id })
        .await
    {
        tracing::error!(job_id = %job_id, error = %e, "Failed to enqueue extraction job");
    }
}
