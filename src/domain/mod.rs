mod catalog;
mod chunk;
mod conversation;
mod conversation_id;
mod document;
mod embedding;
mod intent;
mod invoice;
mod job;
mod job_id;
mod job_stage;
mod job_status;
mod message;
mod message_id;
mod message_role;
mod resolution;
mod stream_event;
mod user_id;

pub use catalog::{CatalogEntity, CatalogEntityId, EntityKind, content_hash, normalize_name};
pub use chunk::{Chunk, ChunkId, DocumentId, Provenance};
pub use conversation::Conversation;
pub use conversation_id::{ConversationId, TurnId};
pub use document::{ContentType, DocumentContent, DocumentRef};
pub use embedding::Embedding;
pub use intent::Intent;
pub use invoice::{
    CandidateLineItem, ComputedTotals, ExtractedInvoice, ExtractionDraft, InvoiceHeader,
    LineFlag, LineItem, StatedTotals, TotalsError, TotalsMismatch, reconcile_totals,
};
pub use job::{FailureKind, Job, JobFailure, JobTransitionError};
pub use job_id::JobId;
pub use job_stage::JobStage;
pub use job_status::JobStatus;
pub use message::{Message, MessageMetadata};
pub use message_id::MessageId;
pub use message_role::MessageRole;
pub use resolution::{MatchKind, Resolution};
pub use stream_event::{EventType, OperationId, StreamEvent};
pub use user_id::{Identity, UserId, UserRole};
