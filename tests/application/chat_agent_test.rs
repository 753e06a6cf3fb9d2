use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use invoice_copilot::application::services::{
    AgentToolbox, ChatAgent, ChatAgentError, IntentRouter, JobLedger, RetrievalService,
    RetrievalSettings, ScopePolicy, StreamCoordinator, TextToSqlService, TextToSqlSettings,
};
use invoice_copilot::domain::{
    ConversationId, EventType, Identity, Message, MessageRole, StreamEvent, UserId,
};
use invoice_copilot::infrastructure::persistence::{
    InMemoryConversationRepository, InMemoryJobRepository, InMemoryVectorStore,
};
use invoice_copilot::infrastructure::text_processing::RecursiveCharacterSplitter;

use crate::helpers::{MockLlmClient, PinnedEmbedder, RecordingSqlExecutor, test_retry};

fn data_query_model() -> MockLlmClient {
    MockLlmClient::new()
        .with_completion("data-query")
        .with_completion("SELECT SUM(total) AS spent FROM invoices")
}

fn chat_agent(llm: MockLlmClient, token_timeout: Option<Duration>) -> Arc<ChatAgent> {
    let llm = Arc::new(llm);
    let coordinator = Arc::new(StreamCoordinator::new(256, Duration::from_secs(60)));
    let ledger = Arc::new(JobLedger::new(
        Arc::new(InMemoryJobRepository::new()),
        Arc::clone(&coordinator),
    ));
    let retrieval = Arc::new(RetrievalService::new(
        Arc::new(PinnedEmbedder::new()),
        llm.clone(),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(RecursiveCharacterSplitter::new(512, 50)),
        RetrievalSettings::default(),
        test_retry(),
    ));
    let text_to_sql = Arc::new(TextToSqlService::new(
        llm.clone(),
        Arc::new(RecordingSqlExecutor::new()),
        ScopePolicy::invoice_schema(),
        TextToSqlSettings::default(),
        test_retry(),
    ));
    let agent = ChatAgent::new(
        Arc::new(InMemoryConversationRepository::new()),
        Arc::new(IntentRouter::new(llm.clone(), test_retry(), 6)),
        retrieval,
        text_to_sql,
        Arc::new(AgentToolbox::new(llm.clone(), ledger, test_retry())),
        llm,
        coordinator,
        6,
    );
    Arc::new(match token_timeout {
        Some(timeout) => agent.with_token_timeout(timeout),
        None => agent,
    })
}

async fn collect(events: impl futures::Stream<Item = StreamEvent>) -> Vec<StreamEvent> {
    tokio::time::timeout(Duration::from_secs(5), events.collect::<Vec<_>>())
        .await
        .expect("Stream did not terminate")
}

/// Polls until the assistant reply of the turn has been stored.
async fn assistant_reply(agent: &ChatAgent, user_id: UserId, session: ConversationId) -> Message {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let history = agent.history(user_id, session).await.unwrap();
            if let Some(reply) = history
                .into_iter()
                .find(|m| m.role == MessageRole::Assistant)
            {
                return reply;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Assistant reply was never stored")
}

#[tokio::test]
async fn given_model_stream_stalls_when_chatting_then_turn_fails_instead_of_hanging() {
    let agent = chat_agent(
        data_query_model().with_stalled_stream(),
        Some(Duration::from_millis(50)),
    );
    let user_id = UserId::new();
    let session = agent.create_session(user_id, None).await.unwrap();

    let turn = agent
        .post_message(Identity::user(user_id), session.id, "How much did I spend?")
        .await
        .unwrap();
    let events = collect(turn.subscription.into_stream()).await;

    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert_eq!(last.data["code"], "generation_failed");
    assert!(events.iter().any(|e| e.event_type == EventType::Data));

    let reply = assistant_reply(&agent, user_id, session.id).await;
    let error = reply.metadata.error.expect("Reply carries no error");
    assert!(error.starts_with("generation_failed"));
    assert!(!reply.metadata.truncated);
}

#[tokio::test]
async fn given_stalled_stream_when_turn_is_cancelled_then_reply_is_stored_as_truncated() {
    let agent = chat_agent(data_query_model().with_stalled_stream(), None);
    let user_id = UserId::new();
    let session = agent.create_session(user_id, None).await.unwrap();
    let turn = agent
        .post_message(Identity::user(user_id), session.id, "How much did I spend?")
        .await
        .unwrap();
    let mut events = Box::pin(turn.subscription.into_stream());
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.next().await {
            if event.event_type == EventType::Data {
                return;
            }
        }
        panic!("Turn ended before its data event");
    })
    .await
    .expect("No data event");

    assert!(agent.cancel_turn(user_id, turn.turn_id).unwrap());
    let rest = collect(events).await;

    let last = rest.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert_eq!(last.data["code"], "cancelled");
    let reply = assistant_reply(&agent, user_id, session.id).await;
    assert!(reply.metadata.truncated);
    assert_eq!(reply.metadata.error, None);
    assert!(!agent.cancel_turn(user_id, turn.turn_id).unwrap());
}

#[tokio::test]
async fn given_other_users_turn_when_cancelling_then_turn_is_not_found() {
    let agent = chat_agent(data_query_model().with_stalled_stream(), None);
    let owner = UserId::new();
    let session = agent.create_session(owner, None).await.unwrap();
    let turn = agent
        .post_message(Identity::user(owner), session.id, "How much did I spend?")
        .await
        .unwrap();

    let result = agent.cancel_turn(UserId::new(), turn.turn_id);

    assert!(matches!(result, Err(ChatAgentError::TurnNotFound(id)) if id == turn.turn_id));
    assert!(agent.cancel_turn(owner, turn.turn_id).unwrap());
}

#[tokio::test]
async fn given_blank_message_when_posting_then_rejected() {
    let agent = chat_agent(MockLlmClient::new(), None);
    let user_id = UserId::new();
    let session = agent.create_session(user_id, None).await.unwrap();

    let result = agent
        .post_message(Identity::user(user_id), session.id, "   ")
        .await;

    assert!(matches!(result, Err(ChatAgentError::EmptyMessage)));
    assert!(agent.history(user_id, session.id).await.unwrap().is_empty());
}
