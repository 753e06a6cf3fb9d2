use serde::{Deserialize, Serialize};

use super::{JobId, TurnId};

/// A logical operation whose events are streamed: one job or one chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationId {
    Job(JobId),
    ChatTurn(TurnId),
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationId::Job(id) => write!(f, "job:{}", id),
            OperationId::ChatTurn(id) => write!(f, "turn:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Progress,
    Intent,
    Context,
    Data,
    Token,
    ToolCall,
    Complete,
    Error,
}

impl EventType {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Complete | EventType::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Progress => "progress",
            EventType::Intent => "intent",
            EventType::Context => "context",
            EventType::Data => "data",
            EventType::Token => "token",
            EventType::ToolCall => "tool_call",
            EventType::Complete => "complete",
            EventType::Error => "error",
        }
    }
}

/// Sequence-numbered event; `seq` starts at 1 and increases by one per
/// operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub seq: u64,
    pub data: serde_json::Value,
}
