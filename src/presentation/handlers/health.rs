use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::presentation::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    pub vector_store: &'static str,
    /// Free slots in the extraction queue.
    pub queue_capacity: usize,
}

/// Degraded once the extraction worker has stopped consuming the queue.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let worker_alive = !state.extraction_sender.is_closed();
    let backend = |configured: bool| if configured { "external" } else { "in_memory" };
    let response = HealthResponse {
        status: if worker_alive { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database: backend(state.settings.database.url.is_some()),
        vector_store: backend(state.settings.qdrant.url.is_some()),
        queue_capacity: state.extraction_sender.capacity(),
    };
    let status = if worker_alive {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}
