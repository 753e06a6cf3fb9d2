mod catalog_index;
mod catalog_repository;
mod collection_config;
mod conversation_repository;
mod document_store;
mod embedder;
mod invoice_repository;
mod job_repository;
mod llm_client;
mod repository_error;
mod search_result;
mod sql_executor;
mod text_splitter;
mod transient;
mod vector_store;
mod vector_store_error;

pub use catalog_index::CatalogIndex;
pub use catalog_repository::CatalogRepository;
pub use collection_config::CollectionConfig;
pub use conversation_repository::ConversationRepository;
pub use document_store::{DocumentStore, DocumentStoreError};
pub use embedder::{Embedder, EmbedderError};
pub use invoice_repository::InvoiceRepository;
pub use job_repository::{JobFilter, JobRepository, Page, Pagination};
pub use llm_client::{LlmClient, LlmClientError, LlmTokenStream};
pub use repository_error::RepositoryError;
pub use search_result::{EntityMatch, SearchResult};
pub use sql_executor::{ColumnSchema, SqlExecutor, SqlExecutorError, TableSchema, TabularResult};
pub use text_splitter::{TextSplitter, TextSplitterError};
pub use transient::Transient;
pub use vector_store::VectorStore;
pub use vector_store_error::VectorStoreError;
