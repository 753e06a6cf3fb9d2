use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tracing::Instrument;

use super::agent_tools::AgentToolbox;
use super::intent_router::IntentRouter;
use super::retrieval_service::{RagStream, RetrievalService};
use super::stream_coordinator::{OperationStream, StreamCoordinator, Subscription};
use super::text_to_sql_service::{SqlAnswer, TextToSqlService};
use crate::application::ports::{ConversationRepository, LlmClient, LlmTokenStream, RepositoryError};
use crate::domain::{
    Conversation, ConversationId, EventType, Identity, Intent, Message, MessageMetadata,
    MessageRole, OperationId, TurnId, UserId,
};

const SUMMARY_INSTRUCTIONS: &str = "You explain query results to the user in two or three sentences. \
Use only the rows given; do not invent figures.";

/// Rows shown to the model when summarizing a query result.
const SUMMARY_PREVIEW_ROWS: usize = 20;

const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ChatTurn {
    pub turn_id: TurnId,
    pub user_message: Message,
    pub subscription: Subscription,
}

enum TurnOutcome {
    Answered(String),
    Failed { code: &'static str, message: String },
    Cancelled(String),
}

enum RelayStop {
    Cancelled,
    Failed(String),
}

/// Conversational front end. Each posted message becomes a turn: the intent
/// is classified, the matching strategy runs, and every step is streamed on
/// the turn's operation stream before the assistant reply is persisted.
pub struct ChatAgent {
    conversations: Arc<dyn ConversationRepository>,
    router: Arc<IntentRouter>,
    retrieval: Arc<RetrievalService>,
    text_to_sql: Arc<TextToSqlService>,
    tools: Arc<AgentToolbox>,
    llm_client: Arc<dyn LlmClient>,
    coordinator: Arc<StreamCoordinator>,
    history_window: usize,
    token_timeout: Duration,
}

impl ChatAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        router: Arc<IntentRouter>,
        retrieval: Arc<RetrievalService>,
        text_to_sql: Arc<TextToSqlService>,
        tools: Arc<AgentToolbox>,
        llm_client: Arc<dyn LlmClient>,
        coordinator: Arc<StreamCoordinator>,
        history_window: usize,
    ) -> Self {
        Self {
            conversations,
            router,
            retrieval,
            text_to_sql,
            tools,
            llm_client,
            coordinator,
            history_window,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }

    /// Longest wait for the next streamed token before the turn gives up.
    pub fn with_token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = timeout;
        self
    }

    pub async fn create_session(
        &self,
        user_id: UserId,
        title: Option<String>,
    ) -> Result<Conversation, ChatAgentError> {
        let conversation = Conversation::new(user_id, title);
        self.conversations.create_conversation(&conversation).await?;
        tracing::info!(conversation_id = %conversation.id, user_id = %user_id, "Chat session created");
        Ok(conversation)
    }

    pub async fn list_sessions(&self, user_id: UserId) -> Result<Vec<Conversation>, ChatAgentError> {
        Ok(self.conversations.list_for_user(user_id).await?)
    }

    /// Sessions of other users are reported as not found.
    pub async fn history(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, ChatAgentError> {
        let conversation = self.owned_conversation(user_id, conversation_id).await?;
        Ok(conversation.messages)
    }

    /// Persists the user message and starts the turn in the background. The
    /// returned subscription already covers every event of the turn.
    pub async fn post_message(
        self: &Arc<Self>,
        identity: Identity,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<ChatTurn, ChatAgentError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatAgentError::EmptyMessage);
        }
        self.owned_conversation(identity.user_id, conversation_id)
            .await?;

        let history = self
            .conversations
            .get_messages(conversation_id, self.history_window)
            .await?;
        let user_message = self
            .conversations
            .append_message(&Message::new(
                conversation_id,
                MessageRole::User,
                text.to_string(),
            ))
            .await?;

        let turn_id = TurnId::new();
        let (stream, _) = self
            .coordinator
            .open(OperationId::ChatTurn(turn_id), Some(identity.user_id));
        let subscription = stream.subscribe(0);

        let agent = Arc::clone(self);
        let text = text.to_string();
        let span = tracing::info_span!(
            "chat_turn",
            turn_id = %turn_id,
            conversation_id = %conversation_id,
            user_id = %identity.user_id,
        );
        tokio::spawn(
            async move {
                agent
                    .run_turn(identity, conversation_id, stream, text, history)
                    .await;
            }
            .instrument(span),
        );

        Ok(ChatTurn {
            turn_id,
            user_message,
            subscription,
        })
    }

    pub fn subscribe_turn(
        &self,
        user_id: UserId,
        turn_id: TurnId,
        after: u64,
    ) -> Result<Subscription, ChatAgentError> {
        match self.coordinator.get(OperationId::ChatTurn(turn_id)) {
            Some(stream) if stream.is_visible_to(user_id) => Ok(stream.subscribe(after)),
            _ => Err(ChatAgentError::TurnNotFound(turn_id)),
        }
    }

    /// Returns false when the turn had already finished.
    pub fn cancel_turn(&self, user_id: UserId, turn_id: TurnId) -> Result<bool, ChatAgentError> {
        match self.coordinator.get(OperationId::ChatTurn(turn_id)) {
            Some(stream) if stream.is_visible_to(user_id) => {
                let cancelled = stream.cancel();
                if cancelled {
                    tracing::info!(turn_id = %turn_id, "Chat turn cancelled");
                }
                Ok(cancelled)
            }
            _ => Err(ChatAgentError::TurnNotFound(turn_id)),
        }
    }

    async fn owned_conversation(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<Conversation, ChatAgentError> {
        match self.conversations.get_conversation(conversation_id).await? {
            Some(conversation) if conversation.is_owned_by(user_id) => Ok(conversation),
            _ => Err(ChatAgentError::SessionNotFound(conversation_id)),
        }
    }

    async fn run_turn(
        self: Arc<Self>,
        identity: Identity,
        conversation_id: ConversationId,
        stream: Arc<OperationStream>,
        text: String,
        history: Vec<Message>,
    ) {
        let intent = self.router.classify(&text, &history).await;
        let mut metadata = MessageMetadata {
            intent: Some(intent),
            ..MessageMetadata::default()
        };

        let outcome = if stream
            .emit(EventType::Intent, json!({ "intent": intent }))
            .is_err()
        {
            TurnOutcome::Cancelled(String::new())
        } else {
            match intent {
                Intent::DocumentationQuery => {
                    self.answer_from_docs(&stream, &text, &mut metadata).await
                }
                Intent::DataQuery => {
                    self.answer_from_data(&stream, identity, &text, &mut metadata)
                        .await
                }
                Intent::ActionRequest | Intent::StatusCheck => {
                    self.run_tool(&stream, identity, intent, &text, &mut metadata)
                        .await
                }
            }
        };

        self.finish_turn(&stream, conversation_id, outcome, metadata)
            .await;
    }

    async fn answer_from_docs(
        &self,
        stream: &OperationStream,
        text: &str,
        metadata: &mut MessageMetadata,
    ) -> TurnOutcome {
        match self.retrieval.answer_stream(text).await {
            Ok(RagStream::InsufficientContext { message }) => {
                let _ = stream.emit(EventType::Data, json!({ "status": "insufficient_context" }));
                let _ = stream.emit(EventType::Token, json!({ "text": message }));
                TurnOutcome::Answered(message)
            }
            Ok(RagStream::Streaming { citations, tokens }) => {
                metadata.citations = citations
                    .iter()
                    .filter_map(|c| serde_json::to_value(c).ok())
                    .collect();
                if stream
                    .emit(EventType::Context, json!({ "citations": citations }))
                    .is_err()
                {
                    return TurnOutcome::Cancelled(String::new());
                }
                relay_outcome(stream, tokens, self.token_timeout).await
            }
            Err(e) => TurnOutcome::Failed {
                code: "retrieval_failed",
                message: e.to_string(),
            },
        }
    }

    async fn answer_from_data(
        &self,
        stream: &OperationStream,
        identity: Identity,
        text: &str,
        metadata: &mut MessageMetadata,
    ) -> TurnOutcome {
        let answer = match self.text_to_sql.query(text, identity.user_id).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "Data query failed");
                return TurnOutcome::Failed {
                    code: e.code(),
                    message: e.to_string(),
                };
            }
        };
        if stream.is_cancelled() {
            return TurnOutcome::Cancelled(String::new());
        }

        let call = json!({ "tool": "sql_query", "query": answer.executed_sql });
        metadata.generated_query = Some(answer.executed_sql.clone());
        metadata.tool_calls.push(call.clone());
        let _ = stream.emit(EventType::ToolCall, call);
        let _ = stream.emit(
            EventType::Data,
            json!({
                "columns": answer.result.columns,
                "rows": answer.result.rows,
                "row_count": answer.result.rows.len(),
                "truncated": answer.result.truncated,
            }),
        );

        match self.summarize(text, &answer).await {
            Some(tokens) => relay_outcome(stream, tokens, self.token_timeout).await,
            None => {
                let summary = fallback_summary(&answer);
                let _ = stream.emit(EventType::Token, json!({ "text": summary }));
                TurnOutcome::Answered(summary)
            }
        }
    }

    async fn summarize(&self, question: &str, answer: &SqlAnswer) -> Option<LlmTokenStream> {
        let preview: Vec<_> = answer
            .result
            .rows
            .iter()
            .take(SUMMARY_PREVIEW_ROWS)
            .collect();
        let context = format!(
            "{}\nColumns: {}\nRows ({} total{}): {}",
            SUMMARY_INSTRUCTIONS,
            answer.result.columns.join(", "),
            answer.result.rows.len(),
            if answer.result.truncated { ", truncated" } else { "" },
            serde_json::to_string(&preview).unwrap_or_default(),
        );
        let opened = tokio::time::timeout(
            self.token_timeout,
            self.llm_client.complete_stream(question, &context),
        )
        .await;
        match opened {
            Ok(Ok(tokens)) => Some(tokens),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Result summary unavailable");
                None
            }
            Err(_) => {
                tracing::warn!("Result summary timed out before streaming");
                None
            }
        }
    }

    async fn run_tool(
        &self,
        stream: &OperationStream,
        identity: Identity,
        intent: Intent,
        text: &str,
        metadata: &mut MessageMetadata,
    ) -> TurnOutcome {
        let tool = self.tools.plan(text, intent).await;
        let call = serde_json::to_value(&tool).unwrap_or_default();
        metadata.tool_calls.push(call.clone());
        if stream.emit(EventType::ToolCall, call).is_err() {
            return TurnOutcome::Cancelled(String::new());
        }

        match self.tools.execute(identity, &tool).await {
            Ok(output) => {
                let _ = stream.emit(EventType::Data, output.data);
                let _ = stream.emit(EventType::Token, json!({ "text": output.summary }));
                TurnOutcome::Answered(output.summary)
            }
            Err(e) => TurnOutcome::Failed {
                code: "tool_failed",
                message: e.to_string(),
            },
        }
    }

    async fn finish_turn(
        &self,
        stream: &OperationStream,
        conversation_id: ConversationId,
        outcome: TurnOutcome,
        mut metadata: MessageMetadata,
    ) {
        let (content, answered) = match outcome {
            TurnOutcome::Answered(content) => (content, true),
            TurnOutcome::Failed { code, message } => {
                metadata.error = Some(format!("{}: {}", code, message));
                let content = format!("I could not complete that request ({}).", code);
                let _ = stream.emit(
                    EventType::Error,
                    json!({ "code": code, "message": message }),
                );
                (content, false)
            }
            TurnOutcome::Cancelled(partial) => {
                metadata.truncated = true;
                (partial, false)
            }
        };

        let reply = Message::new(conversation_id, MessageRole::Assistant, content)
            .with_metadata(metadata);
        match self.conversations.append_message(&reply).await {
            Ok(stored) => {
                if answered {
                    let _ = stream.emit(
                        EventType::Complete,
                        json!({
                            "message_id": stored.id,
                            "content": stored.content,
                            "metadata": stored.metadata,
                        }),
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist assistant reply");
                let _ = stream.emit(
                    EventType::Error,
                    json!({ "code": "persistence_failed", "message": e.to_string() }),
                );
            }
        }
    }
}

async fn relay_outcome(
    stream: &OperationStream,
    tokens: LlmTokenStream,
    token_timeout: Duration,
) -> TurnOutcome {
    let mut buffer = String::new();
    match relay_tokens(stream, tokens, token_timeout, &mut buffer).await {
        Ok(()) => TurnOutcome::Answered(buffer),
        Err(RelayStop::Cancelled) => TurnOutcome::Cancelled(buffer),
        Err(RelayStop::Failed(message)) => {
            if buffer.is_empty() {
                TurnOutcome::Failed {
                    code: "generation_failed",
                    message,
                }
            } else {
                tracing::warn!(error = %message, "Token stream ended early, keeping partial answer");
                TurnOutcome::Answered(buffer)
            }
        }
    }
}

/// Forwards model tokens as events until the model finishes, the turn is
/// cancelled or no token arrives within `token_timeout`. `buffer` holds
/// everything forwarded so far.
async fn relay_tokens(
    stream: &OperationStream,
    mut tokens: LlmTokenStream,
    token_timeout: Duration,
    buffer: &mut String,
) -> Result<(), RelayStop> {
    loop {
        let next = tokio::select! {
            _ = stream.cancelled() => return Err(RelayStop::Cancelled),
            next = tokio::time::timeout(token_timeout, tokens.next()) => next,
        };
        let item = match next {
            Ok(Some(item)) => item,
            Ok(None) => return Ok(()),
            Err(_) => {
                return Err(RelayStop::Failed(format!(
                    "no token from the model within {:?}",
                    token_timeout
                )));
            }
        };
        match item {
            Ok(token) => {
                if stream
                    .emit(EventType::Token, json!({ "text": token }))
                    .is_err()
                {
                    return Err(RelayStop::Cancelled);
                }
                buffer.push_str(&token);
            }
            Err(e) => return Err(RelayStop::Failed(e.to_string())),
        }
    }
}

fn fallback_summary(answer: &SqlAnswer) -> String {
    match answer.result.rows.len() {
        0 => "The query returned no rows.".to_string(),
        1 => "The query returned 1 row.".to_string(),
        n if answer.result.truncated => format!("The query returned the first {} rows.", n),
        n => format!("The query returned {} rows.", n),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatAgentError {
    #[error("chat session not found: {0}")]
    SessionNotFound(ConversationId),
    #[error("chat turn not found: {0}")]
    TurnNotFound(TurnId),
    #[error("message is empty")]
    EmptyMessage,
    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),
}
