use std::sync::Arc;

use serde_json::json;

use super::stream_coordinator::{StreamCoordinator, Subscription};
use crate::application::ports::{JobFilter, JobRepository, Page, Pagination, RepositoryError};
use crate::domain::{
    DocumentRef, EventType, Job, JobFailure, JobId, JobStage, JobStatus, OperationId, UserId,
};

/// Durable job state plus its progress stream. Every accepted transition is
/// mirrored as an event on the job's operation stream.
pub struct JobLedger {
    repository: Arc<dyn JobRepository>,
    coordinator: Arc<StreamCoordinator>,
}

impl JobLedger {
    pub fn new(repository: Arc<dyn JobRepository>, coordinator: Arc<StreamCoordinator>) -> Self {
        Self {
            repository,
            coordinator,
        }
    }

    pub async fn create(&self, user_id: UserId, document: DocumentRef) -> Result<Job, LedgerError> {
        let job = Job::new(user_id, document);
        self.repository.create(&job).await?;
        self.coordinator.open(OperationId::Job(job.id), Some(user_id));
        tracing::info!(job_id = %job.id, user_id = %user_id, "Job created");
        Ok(job)
    }

    /// Only failed jobs can be reprocessed; the new job links back to the
    /// old one and starts from scratch.
    pub async fn reprocess(&self, id: JobId, user_id: UserId) -> Result<Job, LedgerError> {
        let previous = self.get_for_user(id, user_id).await?;
        if previous.status != JobStatus::Failed {
            return Err(LedgerError::NotReprocessable {
                id,
                status: previous.status,
            });
        }
        let job = Job::reprocess_of(&previous);
        self.repository.create(&job).await?;
        self.coordinator.open(OperationId::Job(job.id), Some(user_id));
        tracing::info!(job_id = %job.id, reprocessed_from = %id, "Job reprocess created");
        Ok(job)
    }

    pub async fn find(&self, id: JobId) -> Result<Option<Job>, LedgerError> {
        Ok(self.repository.get_by_id(id).await?)
    }

    /// Jobs of other users are reported as not found.
    pub async fn get_for_user(&self, id: JobId, user_id: UserId) -> Result<Job, LedgerError> {
        match self.repository.get_by_id(id).await? {
            Some(job) if job.user_id == user_id => Ok(job),
            _ => Err(LedgerError::NotFound(id)),
        }
    }

    pub async fn start(&self, id: JobId) -> Result<bool, LedgerError> {
        let applied = self.repository.mark_running(id).await?;
        if applied {
            self.publish(
                id,
                EventType::Progress,
                json!({ "status": JobStatus::Running, "stage": JobStage::Queued, "progress": 0 }),
            );
        }
        Ok(applied)
    }

    /// A rejected advance (finished job, backward move) is logged and
    /// ignored.
    pub async fn advance(
        &self,
        id: JobId,
        stage: JobStage,
        progress: u8,
        checkpoint: Option<&serde_json::Value>,
    ) -> Result<bool, LedgerError> {
        let applied = self.repository.advance(id, stage, progress, checkpoint).await?;
        if !applied {
            tracing::warn!(
                job_id = %id,
                stage = %stage,
                progress,
                "Advance rejected for finished job or backward move"
            );
            return Ok(false);
        }

        self.publish(
            id,
            EventType::Progress,
            json!({
                "status": JobStatus::Running,
                "stage": stage,
                "progress": progress,
                "label": stage.label(),
            }),
        );
        Ok(true)
    }

    pub async fn complete(&self, id: JobId, result: &serde_json::Value) -> Result<bool, LedgerError> {
        let applied = self.repository.complete(id, result).await?;
        if applied {
            self.publish(
                id,
                EventType::Complete,
                json!({ "status": JobStatus::Completed, "progress": 100, "result": result }),
            );
            tracing::info!(job_id = %id, "Job completed");
        } else {
            tracing::warn!(job_id = %id, "Completion rejected, job not running");
        }
        Ok(applied)
    }

    pub async fn fail(&self, id: JobId, failure: &JobFailure) -> Result<bool, LedgerError> {
        let applied = self.repository.fail(id, failure).await?;
        if applied {
            self.publish(
                id,
                EventType::Error,
                json!({ "status": JobStatus::Failed, "error": failure }),
            );
            tracing::warn!(
                job_id = %id,
                kind = failure.kind.as_str(),
                stage = %failure.stage,
                message = %failure.message,
                "Job failed"
            );
        }
        Ok(applied)
    }

    pub async fn list_for_user(
        &self,
        user_id: UserId,
        filter: &JobFilter,
        pagination: Pagination,
    ) -> Result<Page<Job>, LedgerError> {
        Ok(self
            .repository
            .list_for_user(user_id, filter, pagination)
            .await?)
    }

    pub async fn list_unfinished(&self) -> Result<Vec<Job>, LedgerError> {
        Ok(self.repository.list_unfinished().await?)
    }

    pub async fn mark_read(&self, id: JobId, user_id: UserId) -> Result<(), LedgerError> {
        if self.repository.mark_read(id, user_id).await? {
            Ok(())
        } else {
            Err(LedgerError::NotFound(id))
        }
    }

    pub async fn unread_count(&self, user_id: UserId) -> Result<u64, LedgerError> {
        Ok(self.repository.unread_count(user_id).await?)
    }

    /// Sets the abandon flag; the pipeline observes it between stages.
    pub async fn request_abandon(&self, id: JobId, user_id: UserId) -> Result<(), LedgerError> {
        let job = self.get_for_user(id, user_id).await?;
        if job.status.is_terminal() {
            return Err(LedgerError::AlreadyFinished {
                id,
                status: job.status,
            });
        }
        if !self.repository.request_abandon(id, user_id).await? {
            return Err(LedgerError::NotFound(id));
        }
        tracing::info!(job_id = %id, "Job abandonment requested");
        Ok(())
    }

    pub async fn is_abandon_requested(&self, id: JobId) -> Result<bool, LedgerError> {
        Ok(self
            .repository
            .get_by_id(id)
            .await?
            .is_some_and(|job| job.abandon_requested))
    }

    /// Progress subscription for the job's owner. When the live stream is
    /// gone (restart or sweep) a stream holding the current state is
    /// rebuilt from the durable record.
    pub async fn subscribe(
        &self,
        id: JobId,
        user_id: UserId,
        after: u64,
    ) -> Result<Subscription, LedgerError> {
        let job = self.get_for_user(id, user_id).await?;
        let (stream, created) = self.coordinator.open(OperationId::Job(id), Some(user_id));
        if created {
            let (event_type, data) = snapshot_event(&job);
            let _ = stream.emit(event_type, data);
        }
        Ok(stream.subscribe(after))
    }

    fn publish(&self, id: JobId, event_type: EventType, data: serde_json::Value) {
        if let Err(e) = self.coordinator.emit(OperationId::Job(id), event_type, data) {
            tracing::debug!(job_id = %id, error = %e, "Progress event dropped");
        }
    }
}

fn snapshot_event(job: &Job) -> (EventType, serde_json::Value) {
    match job.status {
        JobStatus::Completed => (
            EventType::Complete,
            json!({ "status": job.status, "progress": 100, "result": job.result }),
        ),
        JobStatus::Failed => (
            EventType::Error,
            json!({ "status": job.status, "error": job.error }),
        ),
        JobStatus::Pending | JobStatus::Running => (
            EventType::Progress,
            json!({
                "status": job.status,
                "stage": job.stage,
                "progress": job.progress,
                "label": job.stage.label(),
            }),
        ),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {id} is {status} and cannot be reprocessed")]
    NotReprocessable { id: JobId, status: JobStatus },
    #[error("job {id} already finished as {status}")]
    AlreadyFinished { id: JobId, status: JobStatus },
    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),
}
