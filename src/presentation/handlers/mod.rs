mod api_error;
mod catalog;
mod chat;
mod event_stream;
mod health;
mod identity;
mod jobs;
mod knowledge;

pub use api_error::{ApiError, ErrorResponse};
pub use catalog::{list_entities_handler, reindex_catalog_handler, upsert_entity_handler};
pub use chat::{
    TURN_ID_HEADER, cancel_turn_handler, create_session_handler, list_sessions_handler,
    post_message_handler, session_messages_handler, turn_events_handler,
};
pub use event_stream::{ReplayQuery, sse_response};
pub use health::health_handler;
pub use identity::{AuthenticatedUser, USER_ID_HEADER, USER_ROLE_HEADER};
pub use jobs::{
    abandon_job_handler, create_job_handler, get_job_handler, job_events_handler,
    list_jobs_handler, mark_job_read_handler, reprocess_job_handler, unread_count_handler,
};
pub use knowledge::index_knowledge_handler;
