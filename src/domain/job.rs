use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DocumentRef, JobId, JobStage, JobStatus, UserId};

/// One tracked unit of asynchronous document-extraction work.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub document: DocumentRef,
    pub status: JobStatus,
    pub progress: u8,
    pub stage: JobStage,
    /// Output of the last durably finished stage, used to resume a run.
    pub checkpoint: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub error: Option<JobFailure>,
    pub is_read: bool,
    pub abandon_requested: bool,
    pub reprocessed_from: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientInfra,
    Extraction,
    Validation,
    Cancelled,
    /// The run aborted on a defect rather than on its input.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::TransientInfra => "transient_infra",
            FailureKind::Extraction => "extraction",
            FailureKind::Validation => "validation",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

/// Structured error detail recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub stage: JobStage,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, stage: JobStage, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
        }
    }

    pub fn summary(&self) -> String {
        format!("{} failed: {}", self.stage.label(), self.message)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobTransitionError {
    #[error("job is already {0}")]
    Terminal(JobStatus),
    #[error("cannot move job from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("cannot move job backward from {from_stage}@{from_progress} to {to_stage}@{to_progress}")]
    Regression {
        from_stage: JobStage,
        from_progress: u8,
        to_stage: JobStage,
        to_progress: u8,
    },
}

impl Job {
    pub fn new(user_id: UserId, document: DocumentRef) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id,
            document,
            status: JobStatus::Pending,
            progress: 0,
            stage: JobStage::Queued,
            checkpoint: None,
            result: None,
            error: None,
            is_read: false,
            abandon_requested: false,
            reprocessed_from: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Fresh job for the same document, linked to the one it replaces.
    pub fn reprocess_of(previous: &Job) -> Self {
        let mut job = Self::new(previous.user_id, previous.document.clone());
        job.reprocessed_from = Some(previous.id);
        job
    }

    pub fn start(&mut self) -> Result<(), JobTransitionError> {
        self.transition(JobStatus::Running)?;
        self.touch();
        Ok(())
    }

    pub fn advance(
        &mut self,
        stage: JobStage,
        progress: u8,
        checkpoint: Option<serde_json::Value>,
    ) -> Result<(), JobTransitionError> {
        if self.status.is_terminal() {
            return Err(JobTransitionError::Terminal(self.status));
        }
        if self.status != JobStatus::Running {
            return Err(JobTransitionError::InvalidTransition {
                from: self.status,
                to: JobStatus::Running,
            });
        }
        let progress = progress.min(100);
        if stage < self.stage || progress < self.progress {
            return Err(JobTransitionError::Regression {
                from_stage: self.stage,
                from_progress: self.progress,
                to_stage: stage,
                to_progress: progress,
            });
        }

        self.stage = stage;
        self.progress = progress;
        if checkpoint.is_some() {
            self.checkpoint = checkpoint;
        }
        self.touch();
        Ok(())
    }

    pub fn complete(&mut self, result: serde_json::Value) -> Result<(), JobTransitionError> {
        self.transition(JobStatus::Completed)?;
        self.stage = JobStage::Finished;
        self.progress = 100;
        self.result = Some(result);
        self.finish();
        Ok(())
    }

    /// Failing freezes progress at the stage reached.
    pub fn fail(&mut self, failure: JobFailure) -> Result<(), JobTransitionError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(failure);
        self.finish();
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), JobTransitionError> {
        if self.status.is_terminal() {
            return Err(JobTransitionError::Terminal(self.status));
        }
        if !self.status.can_transition_to(next) {
            return Err(JobTransitionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
