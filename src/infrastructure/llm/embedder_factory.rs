use std::sync::Arc;

use crate::application::ports::Embedder;
use crate::infrastructure::llm::{HashingEmbedder, OpenAiEmbedder};
use crate::presentation::config::{EmbeddingProvider, EmbeddingsSettings};

pub struct EmbedderFactory;

#[derive(Debug, thiserror::Error)]
pub enum EmbedderFactoryError {
    #[error("missing API key: OpenAI embedder requires embeddings.api_key")]
    MissingApiKey,
}

impl EmbedderFactory {
    pub fn create(settings: &EmbeddingsSettings) -> Result<Arc<dyn Embedder>, EmbedderFactoryError> {
        match settings.provider {
            EmbeddingProvider::Hashing => {
                tracing::info!(
                    dimension = settings.dimension,
                    "Using deterministic hashing embedder"
                );
                Ok(Arc::new(HashingEmbedder::new(settings.dimension)))
            }
            EmbeddingProvider::OpenAi => {
                let key = settings
                    .api_key
                    .clone()
                    .filter(|k| !k.is_empty())
                    .ok_or(EmbedderFactoryError::MissingApiKey)?;
                tracing::info!(model = %settings.model, "Using OpenAI embedding model");
                let embedder = match &settings.base_url {
                    Some(base_url) => {
                        OpenAiEmbedder::with_base_url(base_url.clone(), key, settings.model.clone())
                    }
                    None => OpenAiEmbedder::new(key, settings.model.clone()),
                };
                Ok(Arc::new(embedder))
            }
        }
    }
}
