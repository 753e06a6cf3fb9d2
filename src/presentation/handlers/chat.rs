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
use crate::domain::{
    Conversation, ConversationId, Message, MessageId, MessageMetadata, MessageRole, TurnId,
};
use crate::infrastructure::observability::sanitize_prompt;
use crate::presentation::state::AppState;

pub const TURN_ID_HEADER: &str = "x-turn-id";

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub id: ConversationId,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for SessionResponse {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            title: conversation.title,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub metadata: MessageMetadata,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            metadata: message.metadata,
            position: message.position,
            created_at: message.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct CancelTurnResponse {
    pub turn_id: TurnId,
    pub cancelled: bool,
}

pub async fn create_session_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let title = body
        .and_then(|Json(request)| request.title)
        .filter(|t| !t.trim().is_empty());
    let conversation = state
        .chat_agent
        .create_session(user.0.user_id, title)
        .await?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(conversation))))
}

pub async fn list_sessions_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let sessions = state.chat_agent.list_sessions(user.0.user_id).await?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

pub async fn session_messages_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let messages = state
        .chat_agent
        .history(user.0.user_id, ConversationId::from_uuid(session_id))
        .await?;
    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

/// Starts a chat turn and streams its events. The turn id is returned in
/// `x-turn-id` for reconnecting or cancelling.
#[tracing::instrument(skip(state, request), fields(user_id = %user.0.user_id))]
pub async fn post_message_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
    Json(request): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::debug!(prompt = %sanitize_prompt(&request.content), "Chat message received");

    let turn = state
        .chat_agent
        .post_message(
            user.0,
            ConversationId::from_uuid(session_id),
            &request.content,
        )
        .await?;

    let keep_alive = Duration::from_secs(state.settings.streaming.keep_alive_secs);
    Ok((
        [(TURN_ID_HEADER, turn.turn_id.to_string())],
        sse_response(turn.subscription, keep_alive),
    ))
}

pub async fn turn_events_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(turn_id): Path<Uuid>,
    Query(replay): Query<ReplayQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state.chat_agent.subscribe_turn(
        user.0.user_id,
        TurnId::from_uuid(turn_id),
        replay.resolve(&headers),
    )?;
    Ok(sse_response(
        subscription,
        Duration::from_secs(state.settings.streaming.keep_alive_secs),
    ))
}

pub async fn cancel_turn_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(turn_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let turn_id = TurnId::from_uuid(turn_id);
    let cancelled = state.chat_agent.cancel_turn(user.0.user_id, turn_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelTurnResponse { turn_id, cancelled }),
    ))
}
