mod in_memory_repository;
mod pg_catalog_repository;
mod pg_conversation_repository;
mod pg_invoice_repository;
mod pg_job_repository;
mod pg_sql_executor;

pub use in_memory_repository::{
    InMemoryCatalogRepository, InMemoryConversationRepository, InMemoryInvoiceRepository,
    InMemoryJobRepository, UnavailableSqlExecutor,
};
pub use pg_catalog_repository::PgCatalogRepository;
pub use pg_conversation_repository::PgConversationRepository;
pub use pg_invoice_repository::PgInvoiceRepository;
pub use pg_job_repository::PgJobRepository;
pub use pg_sql_executor::PgSqlExecutor;

use crate::application::ports::RepositoryError;

/// Postgres `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

fn query_failed(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => RepositoryError::ConnectionFailed(e.to_string()),
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            RepositoryError::ConstraintViolation(db.message().to_string())
        }
        _ => RepositoryError::QueryFailed(e.to_string()),
    }
}

fn corrupt(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::CorruptRecord(e.to_string())
}

fn encode(e: serde_json::Error) -> RepositoryError {
    RepositoryError::QueryFailed(format!("could not encode column: {}", e))
}
