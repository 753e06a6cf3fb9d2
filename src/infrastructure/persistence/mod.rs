mod pg_pool;
mod repositories;
mod vector_store;

pub use pg_pool::{create_pool, run_migrations};

pub use repositories::{
    InMemoryCatalogRepository, InMemoryConversationRepository, InMemoryInvoiceRepository,
    InMemoryJobRepository, PgCatalogRepository, PgConversationRepository, PgInvoiceRepository,
    PgJobRepository, PgSqlExecutor, UnavailableSqlExecutor,
};

pub use vector_store::{InMemoryCatalogIndex, InMemoryVectorStore, QdrantAdapter, QdrantCatalogIndex};
