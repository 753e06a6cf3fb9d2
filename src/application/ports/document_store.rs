use async_trait::async_trait;

use super::Transient;
use crate::domain::DocumentRef;

/// Read access to raw documents held by the external blob store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch(&self, document: &DocumentRef) -> Result<Vec<u8>, DocumentStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentStoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
}

impl Transient for DocumentStoreError {
    fn is_transient(&self) -> bool {
        matches!(self, DocumentStoreError::ReadFailed(_))
    }
}
