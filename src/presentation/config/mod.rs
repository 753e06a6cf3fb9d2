mod environment;
mod settings;

pub use environment::Environment;
pub use settings::{
    ChatSettings, ChunkingSettings, DatabaseSettings, EmbeddingProvider, EmbeddingsSettings,
    ExtractionSettings, LlmSettings, LoggingSettings, QdrantSettings, RagSettings,
    ResolutionSettings, RetrySettings, ServerSettings, Settings, StorageSettings,
    StreamingSettings, TextToSqlConfig,
};
