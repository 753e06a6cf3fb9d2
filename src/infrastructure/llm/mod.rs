mod embedder_factory;
mod hashing_embedder;
mod openai_embedder;
mod streaming_client;

pub use embedder_factory::{EmbedderFactory, EmbedderFactoryError};
pub use hashing_embedder::HashingEmbedder;
pub use openai_embedder::OpenAiEmbedder;
pub use streaming_client::{StreamingLlmClient, create_streaming_llm_client};
