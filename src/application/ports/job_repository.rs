use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RepositoryError;
use crate::domain::{Job, JobFailure, JobId, JobStage, JobStatus, UserId};

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub is_read: Option<bool>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self.is_read.is_none_or(|r| job.is_read == r)
            && self.created_after.is_none_or(|t| job.created_at >= t)
            && self.created_before.is_none_or(|t| job.created_at < t)
    }
}

/// 1-based page number with a bounded page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// Durable job records. Every mutating call is atomic: a concurrent reader
/// never sees a half-applied update, and the guarded transitions return
/// `false` instead of applying when the job's state forbids them.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &Job) -> Result<(), RepositoryError>;

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError>;

    /// pending -> running.
    async fn mark_running(&self, id: JobId) -> Result<bool, RepositoryError>;

    /// Applies only to a running job and never moves stage or progress backward.
    async fn advance(
        &self,
        id: JobId,
        stage: JobStage,
        progress: u8,
        checkpoint: Option<&serde_json::Value>,
    ) -> Result<bool, RepositoryError>;

    /// running -> completed.
    async fn complete(&self, id: JobId, result: &serde_json::Value)
    -> Result<bool, RepositoryError>;

    /// {pending, running} -> failed.
    async fn fail(&self, id: JobId, failure: &JobFailure) -> Result<bool, RepositoryError>;

    async fn list_for_user(
        &self,
        user_id: UserId,
        filter: &JobFilter,
        pagination: Pagination,
    ) -> Result<Page<Job>, RepositoryError>;

    /// Jobs still pending or running, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<Job>, RepositoryError>;

    async fn mark_read(&self, id: JobId, user_id: UserId) -> Result<bool, RepositoryError>;

    /// Finished jobs the user has not viewed yet.
    async fn unread_count(&self, user_id: UserId) -> Result<u64, RepositoryError>;

    async fn request_abandon(&self, id: JobId, user_id: UserId) -> Result<bool, RepositoryError>;
}
