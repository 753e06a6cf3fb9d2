use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;

use super::{corrupt, encode, query_failed};
use crate::application::ports::{JobFilter, JobRepository, Page, Pagination, RepositoryError};
use crate::domain::{
    DocumentRef, Job, JobFailure, JobId, JobStage, JobStatus, UserId,
};

const JOB_COLUMNS: &str = "id, user_id, document_handle, document_mime_type, document_filename, \
     status, stage, progress, checkpoint, result, error, is_read, abandon_requested, \
     reprocessed_from, created_at, updated_at, completed_at";

pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn stage_rank(stage: JobStage) -> i16 {
    stage as i16
}

fn map_job(row: &PgRow) -> Result<Job, RepositoryError> {
    let status: String = row.try_get("status").map_err(corrupt)?;
    let stage: String = row.try_get("stage").map_err(corrupt)?;
    let progress: i16 = row.try_get("progress").map_err(corrupt)?;
    let error: Option<serde_json::Value> = row.try_get("error").map_err(corrupt)?;

    Ok(Job {
        id: JobId::from_uuid(row.try_get("id").map_err(corrupt)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(corrupt)?),
        document: DocumentRef {
            handle: row.try_get("document_handle").map_err(corrupt)?,
            mime_type: row.try_get("document_mime_type").map_err(corrupt)?,
            filename: row.try_get("document_filename").map_err(corrupt)?,
        },
        status: status
            .parse::<JobStatus>()
            .map_err(RepositoryError::CorruptRecord)?,
        progress: u8::try_from(progress).map_err(corrupt)?,
        stage: stage
            .parse::<JobStage>()
            .map_err(RepositoryError::CorruptRecord)?,
        checkpoint: row.try_get("checkpoint").map_err(corrupt)?,
        result: row.try_get("result").map_err(corrupt)?,
        error: error
            .map(serde_json::from_value::<JobFailure>)
            .transpose()
            .map_err(corrupt)?,
        is_read: row.try_get("is_read").map_err(corrupt)?,
        abandon_requested: row.try_get("abandon_requested").map_err(corrupt)?,
        reprocessed_from: row
            .try_get::<Option<uuid::Uuid>, _>("reprocessed_from")
            .map_err(corrupt)?
            .map(JobId::from_uuid),
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
        completed_at: row.try_get("completed_at").map_err(corrupt)?,
    })
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, user_id: UserId, filter: &JobFilter) {
    builder.push(" WHERE user_id = ").push_bind(user_id.as_uuid());
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(is_read) = filter.is_read {
        builder.push(" AND is_read = ").push_bind(is_read);
    }
    if let Some(after) = filter.created_after {
        builder.push(" AND created_at >= ").push_bind(after);
    }
    if let Some(before) = filter.created_before {
        builder.push(" AND created_at < ").push_bind(before);
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    #[instrument(skip(self, job), fields(job_id = %job.id, user_id = %job.user_id))]
    async fn create(&self, job: &Job) -> Result<(), RepositoryError> {
        let error = job
            .error
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(encode)?;

        sqlx::query(
            r#"
            INSERT INTO extraction_jobs (
                id, user_id, document_handle, document_mime_type, document_filename,
                status, stage, stage_rank, progress, checkpoint, result, error, is_read,
                abandon_requested, reprocessed_from, created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.user_id.as_uuid())
        .bind(&job.document.handle)
        .bind(&job.document.mime_type)
        .bind(&job.document.filename)
        .bind(job.status.as_str())
        .bind(job.stage.as_str())
        .bind(stage_rank(job.stage))
        .bind(i16::from(job.progress))
        .bind(&job.checkpoint)
        .bind(&job.result)
        .bind(error)
        .bind(job.is_read)
        .bind(job.abandon_requested)
        .bind(job.reprocessed_from.map(|id| id.as_uuid()))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM extraction_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        row.as_ref().map(map_job).transpose()
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn mark_running(&self, id: JobId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'RUNNING', updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, checkpoint), fields(job_id = %id, stage = %stage, progress = progress))]
    async fn advance(
        &self,
        id: JobId,
        stage: JobStage,
        progress: u8,
        checkpoint: Option<&serde_json::Value>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET stage = $2,
                stage_rank = $3,
                progress = $4,
                checkpoint = COALESCE($5, checkpoint),
                updated_at = NOW()
            WHERE id = $1
              AND status = 'RUNNING'
              AND stage_rank <= $3
              AND progress <= $4
            "#,
        )
        .bind(id.as_uuid())
        .bind(stage.as_str())
        .bind(stage_rank(stage))
        .bind(i16::from(progress.min(100)))
        .bind(checkpoint)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, result), fields(job_id = %id))]
    async fn complete(
        &self,
        id: JobId,
        result: &serde_json::Value,
    ) -> Result<bool, RepositoryError> {
        let outcome = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'COMPLETED',
                stage = $2,
                stage_rank = $3,
                progress = 100,
                result = $4,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(id.as_uuid())
        .bind(JobStage::Finished.as_str())
        .bind(stage_rank(JobStage::Finished))
        .bind(result)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(outcome.rows_affected() == 1)
    }

    #[instrument(skip(self, failure), fields(job_id = %id, kind = failure.kind.as_str()))]
    async fn fail(&self, id: JobId, failure: &JobFailure) -> Result<bool, RepositoryError> {
        let error = serde_json::to_value(failure).map_err(encode)?;
        let outcome = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'FAILED',
                error = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(outcome.rows_affected() == 1)
    }

    #[instrument(skip(self, filter), fields(user_id = %user_id, page = pagination.page))]
    async fn list_for_user(
        &self,
        user_id: UserId,
        filter: &JobFilter,
        pagination: Pagination,
    ) -> Result<Page<Job>, RepositoryError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM extraction_jobs");
        push_filter(&mut count, user_id, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(query_failed)?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM extraction_jobs", JOB_COLUMNS));
        push_filter(&mut select, user_id, filter);
        select
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(i64::from(pagination.per_page))
            .push(" OFFSET ")
            .push_bind(pagination.offset() as i64);

        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        Ok(Page {
            items: rows.iter().map(map_job).collect::<Result<_, _>>()?,
            total: total.max(0) as u64,
            page: pagination.page,
            per_page: pagination.per_page,
        })
    }

    #[instrument(skip(self))]
    async fn list_unfinished(&self) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM extraction_jobs WHERE status IN ('PENDING', 'RUNNING') \
             ORDER BY created_at ASC",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        rows.iter().map(map_job).collect()
    }

    #[instrument(skip(self), fields(job_id = %id, user_id = %user_id))]
    async fn mark_read(&self, id: JobId, user_id: UserId) -> Result<bool, RepositoryError> {
        let outcome = sqlx::query(
            "UPDATE extraction_jobs SET is_read = TRUE, updated_at = NOW() \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(id.as_uuid())
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(outcome.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn unread_count(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM extraction_jobs \
             WHERE user_id = $1 AND is_read = FALSE AND status IN ('COMPLETED', 'FAILED')",
        )
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self), fields(job_id = %id, user_id = %user_id))]
    async fn request_abandon(&self, id: JobId, user_id: UserId) -> Result<bool, RepositoryError> {
        let outcome = sqlx::query(
            "UPDATE extraction_jobs SET abandon_requested = TRUE, updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND status IN ('PENDING', 'RUNNING')",
        )
        .bind(id.as_uuid())
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(outcome.rows_affected() == 1)
    }
}
