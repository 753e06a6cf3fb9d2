use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::ports::RepositoryError;
use crate::application::services::{CatalogError, ChatAgentError, LedgerError, RetrievalError};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// Error returned by every handler; rendered as `{"error": {code, message}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    fn internal(code: &'static str, error: &dyn std::fmt::Display) -> Self {
        tracing::error!(code, error = %error, "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(what) => ApiError::not_found(what),
            RepositoryError::ConnectionFailed(_) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                "storage is unavailable, retry later",
            ),
            other => ApiError::internal("storage_error", &other),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::NotFound(id) => ApiError::not_found(format!("job not found: {}", id)),
            LedgerError::NotReprocessable { .. } | LedgerError::AlreadyFinished { .. } => {
                ApiError::conflict(error.to_string())
            }
            LedgerError::Repository(e) => e.into(),
        }
    }
}

impl From<ChatAgentError> for ApiError {
    fn from(error: ChatAgentError) -> Self {
        match error {
            ChatAgentError::SessionNotFound(_) | ChatAgentError::TurnNotFound(_) => {
                ApiError::not_found(error.to_string())
            }
            ChatAgentError::EmptyMessage => ApiError::bad_request(error.to_string()),
            ChatAgentError::Repository(e) => e.into(),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::EmptyName => ApiError::bad_request(error.to_string()),
            CatalogError::Repository(e) => e.into(),
            CatalogError::Embedding(_) | CatalogError::Index(_) => {
                ApiError::internal("catalog_index_error", &error)
            }
        }
    }
}

impl From<RetrievalError> for ApiError {
    fn from(error: RetrievalError) -> Self {
        match error {
            RetrievalError::Splitting(_) => ApiError::bad_request(error.to_string()),
            other => ApiError::internal("knowledge_index_error", &other),
        }
    }
}
