use std::time::Duration;

use config::Environment as EnvironmentSource;
use config::{Config, ConfigError, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::Environment;
use crate::application::services::{
    ConfidencePolicy, ExampleQuery, ExtractionSettings as PipelineSettings, ResolutionThresholds,
    RetrievalSettings, RetryPolicy, TextToSqlSettings,
};

/// Every section falls back to its `Default`, so a partial file or a handful
/// of `APP__SECTION__KEY` variables is enough to boot.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub qdrant: QdrantSettings,
    pub llm: LlmSettings,
    pub embeddings: EmbeddingsSettings,
    pub chunking: ChunkingSettings,
    pub rag: RagSettings,
    pub extraction: ExtractionSettings,
    pub resolution: ResolutionSettings,
    pub retry: RetrySettings,
    pub text_to_sql: TextToSqlConfig,
    pub chat: ChatSettings,
    pub streaming: StreamingSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
}

impl Settings {
    /// `appsettings.{env}.toml` (optional), then `APP__SECTION__KEY` variables.
    pub fn load(environment: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                File::with_name(&format!("appsettings.{}", environment.as_str())).required(false),
            )
            .add_source(
                EnvironmentSource::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Without a URL every repository runs in memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Without a URL both vector collections are kept in memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QdrantSettings {
    pub url: Option<String>,
    pub chunk_collection: String,
    pub catalog_collection: String,
}

impl Default for QdrantSettings {
    fn default() -> Self {
        Self {
            url: None,
            chunk_collection: "knowledge_chunks".to_string(),
            catalog_collection: "catalog_entities".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// `openai`, `lmstudio` or `azure`.
    pub provider: String,
    pub base_url: Option<String>,
    pub azure_endpoint: Option<String>,
    pub api_key: String,
    pub chat_model: String,
    /// Model used for document analysis; the chat model when unset.
    pub vision_model: Option<String>,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Longest silence tolerated between response chunks.
    pub read_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: None,
            azure_endpoint: None,
            api_key: String::new(),
            chat_model: "gpt-4o-mini".to_string(),
            vision_model: None,
            max_tokens: 2048,
            temperature: 0.0,
            read_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Hashing,
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingsSettings {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimension: usize,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl Default for EmbeddingsSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            model: "text-embedding-3-small".to_string(),
            dimension: 384,
            api_key: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub top_k: usize,
    pub score_threshold: f32,
    pub candidate_multiplier: usize,
    pub lexical_weight: f32,
    pub max_context_tokens: usize,
    pub insufficient_context_message: String,
}

impl Default for RagSettings {
    fn default() -> Self {
        let defaults = RetrievalSettings::default();
        Self {
            top_k: defaults.top_k,
            score_threshold: defaults.score_threshold,
            candidate_multiplier: defaults.candidate_multiplier,
            lexical_weight: defaults.lexical_weight,
            max_context_tokens: defaults.max_context_tokens,
            insufficient_context_message: defaults.insufficient_context_message,
        }
    }
}

impl RagSettings {
    pub fn to_retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            top_k: self.top_k,
            score_threshold: self.score_threshold,
            candidate_multiplier: self.candidate_multiplier,
            lexical_weight: self.lexical_weight,
            max_context_tokens: self.max_context_tokens,
            insufficient_context_message: self.insufficient_context_message.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
    pub model_weight: f32,
    pub resolution_weight: f32,
    pub new_entry_quality: f32,
    pub min_line_confidence: f32,
    pub totals_tolerance: Decimal,
    pub parse_retries: u32,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        let pipeline = PipelineSettings::default();
        Self {
            max_concurrent_jobs: 4,
            queue_capacity: 256,
            model_weight: pipeline.confidence.model_weight,
            resolution_weight: pipeline.confidence.resolution_weight,
            new_entry_quality: pipeline.confidence.new_entry_quality,
            min_line_confidence: pipeline.confidence.min_line_confidence,
            totals_tolerance: pipeline.totals_tolerance,
            parse_retries: pipeline.parse_retries,
        }
    }
}

impl ExtractionSettings {
    pub fn to_pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            confidence: ConfidencePolicy {
                model_weight: self.model_weight,
                resolution_weight: self.resolution_weight,
                new_entry_quality: self.new_entry_quality,
                min_line_confidence: self.min_line_confidence,
            },
            totals_tolerance: self.totals_tolerance,
            parse_retries: self.parse_retries,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolutionSettings {
    pub accept_threshold: f32,
    pub candidate_threshold: f32,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        let thresholds = ResolutionThresholds::default();
        Self {
            accept_threshold: thresholds.accept,
            candidate_threshold: thresholds.candidate,
        }
    }
}

impl ResolutionSettings {
    pub fn thresholds(&self) -> ResolutionThresholds {
        ResolutionThresholds {
            accept: self.accept_threshold,
            candidate: self.candidate_threshold.min(self.accept_threshold),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub call_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            call_timeout_secs: policy.call_timeout.as_secs(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TextToSqlConfig {
    pub row_cap: usize,
    pub query_timeout_secs: u64,
    pub examples: Vec<ExampleQuery>,
}

impl Default for TextToSqlConfig {
    fn default() -> Self {
        let defaults = TextToSqlSettings::default();
        Self {
            row_cap: defaults.row_cap,
            query_timeout_secs: defaults.query_timeout.as_secs(),
            examples: defaults.examples,
        }
    }
}

impl TextToSqlConfig {
    pub fn to_service_settings(&self) -> TextToSqlSettings {
        TextToSqlSettings {
            row_cap: self.row_cap,
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            examples: self.examples.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Prior messages given to the router and the models.
    pub history_window: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self { history_window: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub replay_capacity: usize,
    /// How long a finished operation's events stay replayable.
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub keep_alive_secs: u64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            replay_capacity: 1024,
            retention_secs: 300,
            sweep_interval_secs: 60,
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub enable_json: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root directory document handles are resolved against.
    pub root_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root_path: "./data/documents".to_string(),
        }
    }
}
