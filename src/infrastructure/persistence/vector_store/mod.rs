mod in_memory_vector_store;
mod qdrant_adapter;
mod qdrant_catalog_index;
mod qdrant_support;

pub use in_memory_vector_store::{InMemoryCatalogIndex, InMemoryVectorStore};
pub use qdrant_adapter::QdrantAdapter;
pub use qdrant_catalog_index::QdrantCatalogIndex;
