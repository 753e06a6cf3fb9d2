use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::infrastructure::observability::request_id_middleware;
use crate::presentation::handlers::{
    abandon_job_handler, cancel_turn_handler, create_job_handler, create_session_handler,
    get_job_handler, health_handler, index_knowledge_handler, job_events_handler,
    list_entities_handler, list_jobs_handler, list_sessions_handler, mark_job_read_handler,
    post_message_handler, reindex_catalog_handler, reprocess_job_handler,
    session_messages_handler, turn_events_handler, unread_count_handler, upsert_entity_handler,
};
use crate::presentation::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let jobs = Router::new()
        .route("/", post(create_job_handler).get(list_jobs_handler))
        .route("/unread-count", get(unread_count_handler))
        .route("/{job_id}", get(get_job_handler))
        .route("/{job_id}/events", get(job_events_handler))
        .route("/{job_id}/read", post(mark_job_read_handler))
        .route("/{job_id}/reprocess", post(reprocess_job_handler))
        .route("/{job_id}/abandon", post(abandon_job_handler));

    let chat = Router::new()
        .route(
            "/sessions",
            post(create_session_handler).get(list_sessions_handler),
        )
        .route(
            "/sessions/{session_id}/messages",
            get(session_messages_handler).post(post_message_handler),
        )
        .route("/turns/{turn_id}", delete(cancel_turn_handler))
        .route("/turns/{turn_id}/events", get(turn_events_handler));

    let catalog = Router::new()
        .route(
            "/entities",
            post(upsert_entity_handler).get(list_entities_handler),
        )
        .route("/reindex", post(reindex_catalog_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1/jobs", jobs)
        .nest("/api/v1/chat", chat)
        .nest("/api/v1/catalog", catalog)
        .route("/api/v1/knowledge/index", post(index_knowledge_handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}
