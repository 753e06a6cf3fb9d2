mod agent_tools;
mod catalog_service;
mod chat_agent;
mod entity_resolver;
mod extraction_orchestrator;
mod extraction_parser;
mod extraction_worker;
mod intent_router;
mod invoice_commit_tool;
mod job_ledger;
mod retrieval_service;
mod retry;
mod sql_guard;
mod stream_coordinator;
mod text_to_sql_service;
mod token_counter;

pub use agent_tools::{AgentTool, AgentToolbox, ToolError, ToolOutput};
pub use catalog_service::{CatalogError, CatalogService};
pub use chat_agent::{ChatAgent, ChatAgentError, ChatTurn};
pub use entity_resolver::{EntityResolver, ResolutionError, ResolutionThresholds};
pub use extraction_orchestrator::{
    Checkpoint, ConfidencePolicy, ExtractionError, ExtractionOrchestrator, ExtractionSettings,
    GatedDraft, JobOutcome, ResolvedDraft,
};
pub use extraction_parser::{EXTRACTION_INSTRUCTIONS, ExtractionParseError, parse_extraction};
pub use extraction_worker::{ExtractionMessage, ExtractionWorker};
pub use intent_router::IntentRouter;
pub use invoice_commit_tool::{
    CommitCommand, CommitError, CommitReceipt, CommitRejected, CommitRules, InvoiceCommitTool,
};
pub use job_ledger::{JobLedger, LedgerError};
pub use retrieval_service::{
    Citation, IndexReport, RagAnswer, RagStream, RetrievalError, RetrievalService,
    RetrievalSettings, RetrievedChunk, SourceDocument, SourceSection,
};
pub use retry::{CallError, RetryPolicy};
pub use sql_guard::{QueryValidationError, ScopePolicy, ScopedQuery, TableAccess, scope_query};
pub use stream_coordinator::{OperationStream, StreamCoordinator, StreamError, Subscription};
pub use text_to_sql_service::{
    ExampleQuery, SqlAnswer, TextToSqlError, TextToSqlService, TextToSqlSettings,
};
pub use token_counter::{count_tokens, truncate_to_tokens};
