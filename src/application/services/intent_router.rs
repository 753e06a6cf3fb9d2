use std::sync::Arc;

use super::retry::RetryPolicy;
use super::token_counter::truncate_to_tokens;
use crate::application::ports::LlmClient;
use crate::domain::{Intent, Message};

const ROUTER_INSTRUCTIONS: &str = "You route messages for an invoice assistant. Classify the user's latest message into exactly one label:\n\
documentation-query: how the product, invoices or processes work; answered from the knowledge base.\n\
data-query: questions about the user's invoices, vendors, products, amounts or dates.\n\
action-request: asks the assistant to do something, such as marking a job as read.\n\
status-check: asks about the state of uploads or extraction jobs.\n\
Reply with the label only.";

/// Earlier messages are clipped so a long answer cannot crowd out the question.
const HISTORY_MESSAGE_TOKENS: usize = 200;

/// Single-call intent classifier. Never fails: unknown labels and model
/// errors fall back to a data query.
pub struct IntentRouter {
    llm_client: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    history_window: usize,
}

impl IntentRouter {
    pub const FALLBACK: Intent = Intent::DataQuery;

    pub fn new(llm_client: Arc<dyn LlmClient>, retry: RetryPolicy, history_window: usize) -> Self {
        Self {
            llm_client,
            retry,
            history_window,
        }
    }

    pub async fn classify(&self, message: &str, history: &[Message]) -> Intent {
        let prompt = self.build_prompt(message, history);
        let raw = match self
            .retry
            .call("intent_classification", || {
                self.llm_client.complete(&prompt, ROUTER_INSTRUCTIONS)
            })
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, fallback = %Self::FALLBACK, "Intent classification failed");
                return Self::FALLBACK;
            }
        };

        match parse_intent(&raw) {
            Some(intent) => {
                tracing::debug!(intent = %intent, "Intent classified");
                intent
            }
            None => {
                tracing::warn!(label = %raw.trim(), fallback = %Self::FALLBACK, "Unrecognized intent label");
                Self::FALLBACK
            }
        }
    }

    fn build_prompt(&self, message: &str, history: &[Message]) -> String {
        let skip = history.len().saturating_sub(self.history_window);
        let mut prompt = String::new();
        for previous in &history[skip..] {
            prompt.push_str(previous.role.as_str());
            prompt.push_str(": ");
            prompt.push_str(&truncate_to_tokens(&previous.content, HISTORY_MESSAGE_TOKENS));
            prompt.push('\n');
        }
        prompt.push_str("user: ");
        prompt.push_str(message);
        prompt
    }
}

/// Accepts the bare label, or the first line or word that is a label.
fn parse_intent(raw: &str) -> Option<Intent> {
    Intent::parse_label(raw)
        .or_else(|| raw.lines().find_map(Intent::parse_label))
        .or_else(|| raw.split_whitespace().find_map(Intent::parse_label))
}
