use std::sync::Arc;

use invoice_copilot::application::services::IntentRouter;
use invoice_copilot::domain::{ConversationId, Intent, Message, MessageRole};

use crate::helpers::{MockLlmClient, test_retry};

fn router(llm: &Arc<MockLlmClient>, history_window: usize) -> IntentRouter {
    IntentRouter::new(llm.clone(), test_retry(), history_window)
}

#[tokio::test]
async fn given_decorated_label_when_classifying_then_intent_is_found() {
    let llm = Arc::new(
        MockLlmClient::new()
            .with_completion("  \"Status_Check\".\n")
            .with_completion("Label: documentation-query"),
    );
    let router = router(&llm, 6);

    assert_eq!(router.classify("any uploads?", &[]).await, Intent::StatusCheck);
    assert_eq!(
        router.classify("how does review work?", &[]).await,
        Intent::DocumentationQuery
    );
}

#[tokio::test]
async fn given_unknown_label_when_classifying_then_falls_back_to_data_query() {
    let llm = Arc::new(MockLlmClient::new().with_completion("weather-report"));

    let intent = router(&llm, 6).classify("is it sunny?", &[]).await;

    assert_eq!(intent, IntentRouter::FALLBACK);
}

#[tokio::test]
async fn given_model_error_when_classifying_then_falls_back_without_retrying() {
    let llm = Arc::new(
        MockLlmClient::new()
            .with_failed_completion()
            .with_fallback_completion("status-check"),
    );

    let intent = router(&llm, 6).classify("mark it read", &[]).await;

    assert_eq!(intent, Intent::DataQuery);
    assert_eq!(llm.complete_calls(), 1);
}

#[tokio::test]
async fn given_long_history_when_classifying_then_only_recent_messages_are_sent() {
    let llm = Arc::new(MockLlmClient::new().with_completion("data-query"));
    let conversation = ConversationId::new();
    let history = vec![
        Message::new(conversation, MessageRole::User, "oldest question".to_string()),
        Message::new(conversation, MessageRole::Assistant, "latest answer".to_string()),
    ];

    router(&llm, 1).classify("and last month?", &history).await;

    let prompt = &llm.prompts()[0];
    assert!(!prompt.contains("oldest question"));
    assert!(prompt.contains("assistant: latest answer"));
    assert!(prompt.ends_with("user: and last month?"));
}
