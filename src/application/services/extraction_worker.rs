use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinError;
use tracing::Instrument;

use super::extraction_orchestrator::{ExtractionOrchestrator, JobOutcome};
use super::job_ledger::JobLedger;
use crate::domain::{FailureKind, JobFailure, JobId, JobStage};

pub struct ExtractionMessage {
    pub job_id: JobId,
}

/// Pulls job ids off the queue and runs them with bounded concurrency. On
/// start it also picks up jobs a previous process left unfinished.
pub struct ExtractionWorker {
    receiver: mpsc::Receiver<ExtractionMessage>,
    orchestrator: Arc<ExtractionOrchestrator>,
    ledger: Arc<JobLedger>,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
}

impl ExtractionWorker {
    pub fn new(
        receiver: mpsc::Receiver<ExtractionMessage>,
        orchestrator: Arc<ExtractionOrchestrator>,
        ledger: Arc<JobLedger>,
        concurrency: usize,
    ) -> Self {
        Self {
            receiver,
            orchestrator,
            ledger,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            concurrency = self.permits.available_permits(),
            "Extraction worker started"
        );
        self.resume_unfinished().await;

        while let Some(msg) = self.receiver.recv().await {
            self.dispatch(msg.job_id).await;
        }
        tracing::info!("Extraction worker stopped: channel closed");
    }

    async fn resume_unfinished(&self) {
        match self.ledger.list_unfinished().await {
            Ok(jobs) => {
                if !jobs.is_empty() {
                    tracing::info!(count = jobs.len(), "Resuming unfinished jobs");
                }
                for job in jobs {
                    self.dispatch(job.id).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "Could not list unfinished jobs for recovery"),
        }
    }

    async fn dispatch(&self, job_id: JobId) {
        if !self.claim(job_id) {
            tracing::debug!(job_id = %job_id, "Job already in flight, skipping");
            return;
        }

        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            tracing::error!(job_id = %job_id, "Worker semaphore closed");
            return;
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        let ledger = Arc::clone(&self.ledger);
        let in_flight = Arc::clone(&self.in_flight);
        let span = tracing::info_span!(
            "extraction_job",
            job_id = %job_id,
            user_id = tracing::field::Empty,
        );

        tokio::spawn(
            async move {
                let _permit = permit;
                let run = tokio::spawn(
                    async move { orchestrator.run(job_id).await }.in_current_span(),
                );
                match run.await {
                    Ok(Ok(JobOutcome::Completed(invoice))) => {
                        tracing::info!(
                            invoice_id = %invoice.id,
                            lines = invoice.line_items.len(),
                            "Extraction completed"
                        );
                    }
                    Ok(Ok(JobOutcome::Failed(failure))) => {
                        tracing::warn!(kind = failure.kind.as_str(), summary = %failure.summary(), "Extraction failed");
                    }
                    Ok(Ok(JobOutcome::AlreadyFinished(status))) => {
                        tracing::debug!(status = %status, "Job already finished");
                    }
                    Ok(Err(e)) => tracing::error!(error = %e, "Extraction job aborted"),
                    Err(e) => fail_aborted_run(&ledger, job_id, &e).await,
                }
                release(&in_flight, job_id);
            }
            .instrument(span),
        );
    }

    fn claim(&self, job_id: JobId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job_id)
    }
}

/// A run that panicked left the job running; fail it where it stopped so
/// recovery does not pick it up again.
async fn fail_aborted_run(ledger: &JobLedger, job_id: JobId, error: &JoinError) {
    let stage = match ledger.find(job_id).await {
        Ok(Some(job)) => job.stage,
        _ => JobStage::Queued,
    };
    let message = if error.is_panic() {
        "extraction run panicked"
    } else {
        "extraction run was cancelled"
    };
    tracing::error!(error = %error, stage = %stage, "Extraction run aborted unexpectedly");

    let failure = JobFailure::new(FailureKind::Internal, stage, message);
    match ledger.fail(job_id, &failure).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!("Aborted job was not running, left unchanged"),
        Err(e) => tracing::error!(error = %e, "Could not record aborted job"),
    }
}

fn release(in_flight: &Mutex<HashSet<JobId>>, job_id: JobId) {
    in_flight
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .remove(&job_id);
}
