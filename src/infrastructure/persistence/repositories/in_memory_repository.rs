use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::application::ports::{
    CatalogRepository, ConversationRepository, InvoiceRepository, JobFilter, JobRepository, Page,
    Pagination, RepositoryError, SqlExecutor, SqlExecutorError, TableSchema, TabularResult,
};
use crate::domain::{
    CatalogEntity, CatalogEntityId, Conversation, ConversationId, EntityKind, ExtractedInvoice,
    Job, JobFailure, JobId, JobStage, JobStatus, Message, UserId,
};

/// Process-local job store. Transitions go through the domain `Job`
/// methods, so the guards match the Postgres implementation.
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &Job) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn mark_running(&self, id: JobId) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.write().await;
        Ok(match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => job.start().is_ok(),
            _ => false,
        })
    }

    async fn advance(
        &self,
        id: JobId,
        stage: JobStage,
        progress: u8,
        checkpoint: Option<&serde_json::Value>,
    ) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs
            .get_mut(&id)
            .is_some_and(|job| job.advance(stage, progress, checkpoint.cloned()).is_ok()))
    }

    async fn complete(
        &self,
        id: JobId,
        result: &serde_json::Value,
    ) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs
            .get_mut(&id)
            .is_some_and(|job| job.complete(result.clone()).is_ok()))
    }

    async fn fail(&self, id: JobId, failure: &JobFailure) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs
            .get_mut(&id)
            .is_some_and(|job| job.fail(failure.clone()).is_ok()))
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        filter: &JobFilter,
        pagination: Pagination,
    ) -> Result<Page<Job>, RepositoryError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<&Job> = jobs
            .values()
            .filter(|job| job.user_id == user_id && filter.matches(job))
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.as_uuid().cmp(&b.id.as_uuid()))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.per_page as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            total,
            page: pagination.page,
            per_page: pagination.per_page,
        })
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self.jobs.read().await;
        let mut unfinished: Vec<Job> = jobs
            .values()
            .filter(|job| !job.status.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by_key(|job| job.created_at);
        Ok(unfinished)
    }

    async fn mark_read(&self, id: JobId, user_id: UserId) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.user_id == user_id => {
                job.is_read = true;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unread_count(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|job| job.user_id == user_id && job.status.is_terminal() && !job.is_read)
            .count() as u64)
    }

    async fn request_abandon(&self, id: JobId, user_id: UserId) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.user_id == user_id && !job.status.is_terminal() => {
                job.abandon_requested = true;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        self.conversations
            .write()
            .await
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.read().await.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let mut owned: Vec<Conversation> = conversations
            .values()
            .filter(|c| c.is_owned_by(user_id))
            .map(|c| Conversation {
                messages: Vec::new(),
                ..c.clone()
            })
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned)
    }

    async fn append_message(&self, message: &Message) -> Result<Message, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("conversation {}", message.conversation_id))
            })?;

        let mut stored = message.clone();
        stored.position = conversation
            .messages
            .last()
            .map(|m| m.position + 1)
            .unwrap_or(1);
        conversation.messages.push(stored.clone());
        conversation.updated_at = Utc::now();
        Ok(stored)
    }

    async fn get_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(&conversation_id)
            .map(|c| {
                let skip = c.messages.len().saturating_sub(limit);
                c.messages[skip..].to_vec()
            })
            .unwrap_or_default())
    }
}

/// Keyed by id with a `(kind, normalized name)` index; the single write lock
/// makes `create_or_get` atomic.
#[derive(Default)]
pub struct InMemoryCatalogRepository {
    state: RwLock<CatalogState>,
}

#[derive(Default)]
struct CatalogState {
    entities: HashMap<CatalogEntityId, CatalogEntity>,
    by_name: HashMap<(EntityKind, String), CatalogEntityId>,
}

impl InMemoryCatalogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn get(&self, id: CatalogEntityId) -> Result<Option<CatalogEntity>, RepositoryError> {
        Ok(self.state.read().await.entities.get(&id).cloned())
    }

    async fn find_by_name(
        &self,
        kind: EntityKind,
        normalized_name: &str,
    ) -> Result<Option<CatalogEntity>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .by_name
            .get(&(kind, normalized_name.to_string()))
            .and_then(|id| state.entities.get(id))
            .cloned())
    }

    async fn create_or_get(
        &self,
        entity: &CatalogEntity,
    ) -> Result<(CatalogEntity, bool), RepositoryError> {
        let mut state = self.state.write().await;
        let key = (entity.kind, entity.normalized_name());
        if let Some(existing) = state.by_name.get(&key).and_then(|id| state.entities.get(id)) {
            return Ok((existing.clone(), false));
        }
        state.by_name.insert(key, entity.id);
        state.entities.insert(entity.id, entity.clone());
        Ok((entity.clone(), true))
    }

    async fn update(&self, entity: &CatalogEntity) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let previous = state
            .entities
            .get(&entity.id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("catalog entity {}", entity.id)))?;

        let key = (entity.kind, entity.normalized_name());
        if let Some(owner) = state.by_name.get(&key)
            && *owner != entity.id
        {
            return Err(RepositoryError::ConstraintViolation(format!(
                "{} '{}' already exists",
                entity.kind, key.1
            )));
        }
        state
            .by_name
            .remove(&(previous.kind, previous.normalized_name()));
        state.by_name.insert(key, entity.id);
        state.entities.insert(entity.id, entity.clone());
        Ok(())
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<CatalogEntity>, RepositoryError> {
        let state = self.state.read().await;
        let mut entities: Vec<CatalogEntity> = state
            .entities
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entities)
    }
}

#[derive(Default)]
pub struct InMemoryInvoiceRepository {
    invoices: RwLock<HashMap<JobId, ExtractedInvoice>>,
}

impl InMemoryInvoiceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.invoices.read().await.len()
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryInvoiceRepository {
    async fn find_by_job(&self, job_id: JobId) -> Result<Option<ExtractedInvoice>, RepositoryError> {
        Ok(self.invoices.read().await.get(&job_id).cloned())
    }

    async fn insert(&self, invoice: &ExtractedInvoice) -> Result<(), RepositoryError> {
        let mut invoices = self.invoices.write().await;
        if invoices.contains_key(&invoice.job_id) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "invoice for job {} already exists",
                invoice.job_id
            )));
        }
        invoices.insert(invoice.job_id, invoice.clone());
        Ok(())
    }
}

/// Stands in for the SQL path when no database is configured; every data
/// question fails with a clear error instead of a silent empty result.
pub struct UnavailableSqlExecutor;

#[async_trait]
impl SqlExecutor for UnavailableSqlExecutor {
    async fn describe(&self, _tables: &[String]) -> Result<Vec<TableSchema>, SqlExecutorError> {
        Err(SqlExecutorError::ExecutionFailed(
            "no database configured".to_string(),
        ))
    }

    async fn execute_read(
        &self,
        _sql: &str,
        _row_cap: usize,
        _timeout: std::time::Duration,
    ) -> Result<TabularResult, SqlExecutorError> {
        Err(SqlExecutorError::ExecutionFailed(
            "no database configured".to_string(),
        ))
    }
}
