use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;

use super::Transient;
use crate::domain::DocumentContent;

pub type LlmTokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmClientError>> + Send + 'static>>;

/// Chat-completion style model. `context` is the system instruction block,
/// `prompt` the user turn.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, LlmClientError>;

    async fn complete_stream(
        &self,
        prompt: &str,
        context: &str,
    ) -> Result<LlmTokenStream, LlmClientError>;

    /// Vision-capable completion over a raw document.
    async fn analyze_document(
        &self,
        instructions: &str,
        document: &DocumentContent,
    ) -> Result<String, LlmClientError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmClientError {
    #[error("api request failed: {0}")]
    ApiRequestFailed(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("unsupported document: {0}")]
    UnsupportedDocument(String),
}

impl Transient for LlmClientError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmClientError::ApiRequestFailed(_) | LlmClientError::RateLimited | LlmClientError::Timeout
        )
    }
}
