use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::{corrupt, encode, query_failed};
use crate::application::ports::{ConversationRepository, RepositoryError};
use crate::domain::{
    Conversation, ConversationId, Message, MessageId, MessageMetadata, MessageRole, UserId,
};

/// Upper bound on messages loaded with a conversation.
const CONVERSATION_MESSAGE_LIMIT: usize = 1000;

pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_conversation(row: &PgRow) -> Result<Conversation, RepositoryError> {
    Ok(Conversation {
        id: ConversationId::from_uuid(row.try_get("id").map_err(corrupt)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(corrupt)?),
        title: row.try_get("title").map_err(corrupt)?,
        messages: Vec::new(),
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
    })
}

fn map_message(row: &PgRow) -> Result<Message, RepositoryError> {
    let role: String = row.try_get("role").map_err(corrupt)?;
    let metadata: serde_json::Value = row.try_get("metadata").map_err(corrupt)?;

    Ok(Message {
        id: MessageId::from_uuid(row.try_get("id").map_err(corrupt)?),
        conversation_id: ConversationId::from_uuid(
            row.try_get("conversation_id").map_err(corrupt)?,
        ),
        role: role
            .parse::<MessageRole>()
            .map_err(RepositoryError::CorruptRecord)?,
        content: row.try_get("content").map_err(corrupt)?,
        metadata: serde_json::from_value::<MessageMetadata>(metadata).map_err(corrupt)?,
        position: row.try_get("position").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    #[instrument(skip(self, conversation), fields(conversation_id = %conversation.id, user_id = %conversation.user_id))]
    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, title, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(conversation.id.as_uuid())
        .bind(conversation.user_id.as_uuid())
        .bind(&conversation.title)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(())
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, title, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        match row {
            Some(row) => {
                let mut conversation = map_conversation(&row)?;
                conversation.messages = self.get_messages(id, CONVERSATION_MESSAGE_LIMIT).await?;
                Ok(Some(conversation))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, created_at, updated_at FROM conversations \
             WHERE user_id = $1 ORDER BY updated_at DESC",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        rows.iter().map(map_conversation).collect()
    }

    #[instrument(skip(self, message), fields(message_id = %message.id.as_uuid(), conversation_id = %message.conversation_id))]
    async fn append_message(&self, message: &Message) -> Result<Message, RepositoryError> {
        let metadata = serde_json::to_value(&message.metadata).map_err(encode)?;
        let mut tx = self.pool.begin().await.map_err(query_failed)?;

        // Row lock serializes concurrent appends to the same conversation.
        let locked = sqlx::query("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(message.conversation_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_failed)?;
        if locked.is_none() {
            return Err(RepositoryError::NotFound(format!(
                "conversation {}",
                message.conversation_id
            )));
        }

        let position: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (id, conversation_id, position, role, content, metadata, created_at)
            SELECT $1, $2, COALESCE(MAX(position), 0) + 1, $3, $4, $5, $6
            FROM messages
            WHERE conversation_id = $2
            RETURNING position
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(message.conversation_id.as_uuid())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(metadata)
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(query_failed)?;

        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(message.conversation_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(query_failed)?;

        tx.commit().await.map_err(query_failed)?;

        let mut stored = message.clone();
        stored.position = position;
        Ok(stored)
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id, limit = limit))]
    async fn get_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, position, role, content, metadata, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY position DESC
            LIMIT $2
            "#,
        )
        .bind(conversation_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        let mut messages = rows.iter().map(map_message).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}
