use std::sync::Arc;

use tokio::sync::mpsc;

use invoice_copilot::application::services::{ExtractionMessage, ExtractionWorker};
use invoice_copilot::domain::{EntityKind, FailureKind, JobStage, JobStatus, UserId};

use crate::helpers::{
    MockLlmClient, PinnedEmbedder, TestPipeline, axis, invoice_json, near_first_axis,
};

#[tokio::test]
async fn given_run_that_panics_when_working_then_job_fails_and_worker_keeps_going() {
    let pipeline = TestPipeline::new(
        MockLlmClient::new().with_analysis(invoice_json(
            "Acme Supplies",
            &[("Widget A", 3.0, 10.0, 0.95)],
            30.0,
        )),
        PinnedEmbedder::new().pin("Widget A", near_first_axis(0.92)),
    );
    pipeline
        .seed_entity(EntityKind::Product, "Widget A", axis(0))
        .await;
    let user_id = UserId::new();
    let (sender, receiver) = mpsc::channel(8);
    tokio::spawn(
        ExtractionWorker::new(
            receiver,
            Arc::clone(&pipeline.orchestrator),
            Arc::clone(&pipeline.ledger),
            1,
        )
        .run(),
    );

    let broken = pipeline.submit_document(user_id, "panic/invoice.pdf").await;
    sender
        .send(ExtractionMessage { job_id: broken.id })
        .await
        .unwrap();
    let healthy = pipeline.submit(user_id).await;
    sender
        .send(ExtractionMessage { job_id: healthy.id })
        .await
        .unwrap();

    let broken = pipeline.wait_until_finished(broken.id).await;
    let healthy = pipeline.wait_until_finished(healthy.id).await;

    assert_eq!(broken.status, JobStatus::Failed);
    let failure = broken.error.expect("Failed job has no error");
    assert_eq!(failure.kind, FailureKind::Internal);
    assert_eq!(failure.stage, JobStage::DocumentAnalysis);
    assert_eq!(healthy.status, JobStatus::Completed);
    assert_eq!(pipeline.invoices.count().await, 1);
}

#[tokio::test]
async fn given_pending_jobs_when_worker_starts_then_they_are_resumed() {
    let pipeline = TestPipeline::new(
        MockLlmClient::new().with_analysis(invoice_json(
            "Acme Supplies",
            &[("Widget A", 3.0, 10.0, 0.95)],
            30.0,
        )),
        PinnedEmbedder::new().pin("Widget A", near_first_axis(0.92)),
    );
    pipeline
        .seed_entity(EntityKind::Product, "Widget A", axis(0))
        .await;
    let job = pipeline.submit(UserId::new()).await;
    let (_sender, receiver) = mpsc::channel::<ExtractionMessage>(8);

    tokio::spawn(
        ExtractionWorker::new(
            receiver,
            Arc::clone(&pipeline.orchestrator),
            Arc::clone(&pipeline.ledger),
            2,
        )
        .run(),
    );

    let finished = pipeline.wait_until_finished(job.id).await;
    assert_eq!(finished.status, JobStatus::Completed);
}
