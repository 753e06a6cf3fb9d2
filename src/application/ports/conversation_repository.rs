use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::{Conversation, ConversationId, Message, UserId};

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create_conversation(&self, conversation: &Conversation)
    -> Result<(), RepositoryError>;

    /// Returns the conversation with its messages in order.
    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, RepositoryError>;

    /// Persists the message at the next position of its conversation and
    /// returns the stored copy.
    async fn append_message(&self, message: &Message) -> Result<Message, RepositoryError>;

    /// Last `limit` messages, oldest first.
    async fn get_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;
}
