use async_trait::async_trait;

use crate::domain::{Chunk, DocumentId, Provenance};

/// Cuts extracted document text into overlapping chunks. Every chunk carries
/// the document's provenance so search hits can be cited.
#[async_trait]
pub trait TextSplitter: Send + Sync {
    async fn split(
        &self,
        text: &str,
        document_id: DocumentId,
        provenance: &Provenance,
    ) -> Result<Vec<Chunk>, TextSplitterError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TextSplitterError {
    #[error("invalid chunking configuration: {0}")]
    InvalidConfiguration(String),
}
