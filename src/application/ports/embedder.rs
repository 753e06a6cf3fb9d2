use async_trait::async_trait;

use super::Transient;
use crate::domain::Embedding;

/// Must be the same model for catalog/corpus indexing and for queries.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedderError>;
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbedderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    #[error("embedding api request failed: {0}")]
    ApiRequestFailed(String),
    #[error("embedding rate limited")]
    RateLimited,
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

impl Transient for EmbedderError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbedderError::ApiRequestFailed(_) | EmbedderError::RateLimited
        )
    }
}
