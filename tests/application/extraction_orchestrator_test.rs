use rust_decimal::Decimal;

use invoice_copilot::application::ports::CatalogRepository;
use invoice_copilot::application::services::{
    Checkpoint, ConfidencePolicy, JobOutcome, ResolvedDraft, parse_extraction,
};
use invoice_copilot::domain::{
    CandidateLineItem, CatalogEntityId, EntityKind, ExtractedInvoice, ExtractionDraft,
    FailureKind, InvoiceHeader, JobFailure, JobId, JobStage, JobStatus, LineFlag, MatchKind,
    Resolution, StatedTotals, UserId,
};

use crate::helpers::{
    MockLlmClient, PinnedEmbedder, TestPipeline, axis, invoice_json, near_first_axis,
};

fn resolution(match_kind: MatchKind, score: f32) -> Resolution {
    Resolution {
        kind: EntityKind::Product,
        query: "Widget A".to_string(),
        entity_id: Some(CatalogEntityId::new()),
        score,
        match_kind,
    }
}

fn widget_invoice() -> String {
    invoice_json("Acme Supplies", &[("Widget A", 3.0, 10.0, 0.95)], 30.0)
}

fn completed(outcome: JobOutcome) -> ExtractedInvoice {
    match outcome {
        JobOutcome::Completed(invoice) => *invoice,
        other => panic!("Expected completed job, got {:?}", other),
    }
}

fn failed(outcome: JobOutcome) -> JobFailure {
    match outcome {
        JobOutcome::Failed(failure) => failure,
        other => panic!("Expected failed job, got {:?}", other),
    }
}

/// Marks the job running and records `checkpoint` as the output of `stage`.
async fn checkpoint_job(
    pipeline: &TestPipeline,
    job_id: JobId,
    stage: JobStage,
    checkpoint: &serde_json::Value,
) {
    assert!(pipeline.ledger.start(job_id).await.unwrap());
    assert!(
        pipeline
            .ledger
            .advance(job_id, stage, stage.completed_progress(), Some(checkpoint))
            .await
            .unwrap()
    );
}

#[test]
fn given_strong_model_and_match_when_scoring_then_above_minimum() {
    let policy = ConfidencePolicy::default();

    let confidence = policy.line_confidence(0.95, &resolution(MatchKind::Similarity, 0.92));

    assert!((confidence - 0.935).abs() < 1e-6);
    assert!(confidence >= policy.min_line_confidence);
}

#[test]
fn given_weak_model_and_candidate_when_scoring_then_below_minimum() {
    let policy = ConfidencePolicy::default();

    let confidence = policy.line_confidence(0.5, &resolution(MatchKind::Candidate, 0.65));

    assert!(confidence < policy.min_line_confidence);
}

#[test]
fn given_exact_match_when_scoring_then_resolution_quality_is_full() {
    let policy = ConfidencePolicy {
        model_weight: 0.0,
        resolution_weight: 1.0,
        ..ConfidencePolicy::default()
    };

    assert_eq!(policy.line_confidence(0.1, &resolution(MatchKind::Exact, 1.0)), 1.0);
}

#[test]
fn given_checkpoint_when_round_tripping_json_then_stage_tag_is_kept() {
    let checkpoint = Checkpoint::Analyzed {
        draft: ExtractionDraft {
            header: InvoiceHeader {
                vendor_name: "Acme".to_string(),
                invoice_number: None,
                invoice_date: None,
                salesperson: None,
                currency: None,
            },
            totals: StatedTotals {
                subtotal: None,
                tax: None,
                total: Decimal::new(30, 0),
            },
            line_items: Vec::new(),
        },
    };

    let value = serde_json::to_value(&checkpoint).unwrap();

    assert_eq!(value["stage"], "analyzed");
    assert_eq!(serde_json::from_value::<Checkpoint>(value).unwrap(), checkpoint);
}

#[tokio::test]
async fn given_resolved_checkpoint_when_running_then_analysis_and_resolution_are_skipped() {
    let pipeline = TestPipeline::new(
        MockLlmClient::new(),
        PinnedEmbedder::new().pin("Widget A", near_first_axis(0.92)),
    );
    let widget = pipeline
        .seed_entity(EntityKind::Product, "Widget A", axis(0))
        .await;
    let resolved = ResolvedDraft {
        draft: parse_extraction(&widget_invoice()).unwrap(),
        vendor: Some(
            pipeline
                .resolver
                .resolve(EntityKind::Company, "Acme Supplies")
                .await
                .unwrap(),
        ),
        salesperson: None,
        lines: vec![
            pipeline
                .resolver
                .resolve(EntityKind::Product, "Widget A")
                .await
                .unwrap(),
        ],
    };
    let job = pipeline.submit(UserId::new()).await;
    let checkpoint = serde_json::to_value(Checkpoint::Resolved { resolved }).unwrap();
    checkpoint_job(&pipeline, job.id, JobStage::EntityResolution, &checkpoint).await;

    let invoice = completed(pipeline.orchestrator.run(job.id).await.unwrap());

    assert_eq!(pipeline.llm.analyze_calls(), 0);
    assert_eq!(invoice.line_items[0].product_id, Some(widget.id));
    let stored = pipeline.ledger.find(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
}

#[tokio::test]
async fn given_validated_checkpoint_when_running_then_only_commit_runs() {
    let pipeline = TestPipeline::new(
        MockLlmClient::new().with_analysis(widget_invoice()),
        PinnedEmbedder::new().pin("Widget A", near_first_axis(0.92)),
    );
    pipeline
        .seed_entity(EntityKind::Product, "Widget A", axis(0))
        .await;
    let user_id = UserId::new();
    let first = pipeline.submit(user_id).await;
    completed(pipeline.orchestrator.run(first.id).await.unwrap());
    let validated = pipeline
        .ledger
        .find(first.id)
        .await
        .unwrap()
        .unwrap()
        .checkpoint
        .expect("Completed job kept no checkpoint");
    assert_eq!(validated["stage"], "validated");

    let second = pipeline.submit(user_id).await;
    checkpoint_job(&pipeline, second.id, JobStage::Validation, &validated).await;
    let invoice = completed(pipeline.orchestrator.run(second.id).await.unwrap());

    assert_eq!(pipeline.llm.analyze_calls(), 1);
    assert_eq!(invoice.job_id, second.id);
    assert_eq!(invoice.computed_totals.total, Decimal::from(30));
    assert_eq!(pipeline.invoices.count().await, 2);
    assert_eq!(pipeline.catalog.list(EntityKind::Company).await.unwrap().len(), 1);
}

#[tokio::test]
async fn given_document_store_failing_transiently_when_running_then_job_fails_as_infrastructure() {
    let pipeline = TestPipeline::new(
        MockLlmClient::new().with_analysis(widget_invoice()),
        PinnedEmbedder::new(),
    );
    let job = pipeline
        .submit_document(UserId::new(), "flaky/invoice.pdf")
        .await;

    let failure = failed(pipeline.orchestrator.run(job.id).await.unwrap());

    assert_eq!(failure.kind, FailureKind::TransientInfra);
    assert_eq!(failure.stage, JobStage::DocumentAnalysis);
    assert_eq!(pipeline.llm.analyze_calls(), 0);
    let stored = pipeline.ledger.find(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
}

#[tokio::test]
async fn given_missing_document_when_running_then_job_fails_as_extraction() {
    let pipeline = TestPipeline::new(MockLlmClient::new(), PinnedEmbedder::new());
    let job = pipeline
        .submit_document(UserId::new(), "missing/invoice.pdf")
        .await;

    let failure = failed(pipeline.orchestrator.run(job.id).await.unwrap());

    assert_eq!(failure.kind, FailureKind::Extraction);
    assert_eq!(failure.stage, JobStage::DocumentAnalysis);
}

#[tokio::test]
async fn given_similarity_between_candidate_and_accept_when_extracting_then_line_awaits_review() {
    let pipeline = TestPipeline::new(
        MockLlmClient::new().with_analysis(widget_invoice()),
        PinnedEmbedder::new().pin("Widget A", near_first_axis(0.7)),
    );
    let widget = pipeline
        .seed_entity(EntityKind::Product, "Widget", axis(0))
        .await;
    let job = pipeline.submit(UserId::new()).await;

    let invoice = completed(pipeline.orchestrator.run(job.id).await.unwrap());

    let line = &invoice.line_items[0];
    assert_eq!(line.product_id, None);
    assert!(!line.matched_by_embedding);
    assert!(line.flags.iter().any(|flag| matches!(
        flag,
        LineFlag::NeedsReview { candidate, score } if *candidate == widget.id && (*score - 0.7).abs() < 1e-3
    )));
    assert_eq!(pipeline.catalog.list(EntityKind::Product).await.unwrap().len(), 1);
}

#[tokio::test]
async fn given_line_total_beyond_decimal_range_when_gating_then_job_fails_validation() {
    let pipeline = TestPipeline::new(MockLlmClient::new(), PinnedEmbedder::new());
    let resolved = ResolvedDraft {
        draft: ExtractionDraft {
            header: InvoiceHeader {
                vendor_name: String::new(),
                invoice_number: None,
                invoice_date: None,
                salesperson: None,
                currency: None,
            },
            totals: StatedTotals {
                subtotal: None,
                tax: None,
                total: Decimal::from(10),
            },
            line_items: vec![CandidateLineItem {
                description: "Bulk order".to_string(),
                quantity: Decimal::MAX,
                unit_price: Decimal::from(2),
                amount: None,
                model_confidence: 0.9,
            }],
        },
        vendor: None,
        salesperson: None,
        lines: vec![Resolution::no_match(EntityKind::Product, "Bulk order", 0.0)],
    };
    let job = pipeline.submit(UserId::new()).await;
    let checkpoint = serde_json::to_value(Checkpoint::Resolved { resolved }).unwrap();
    checkpoint_job(&pipeline, job.id, JobStage::EntityResolution, &checkpoint).await;

    let failure = failed(pipeline.orchestrator.run(job.id).await.unwrap());

    assert_eq!(failure.kind, FailureKind::Validation);
    assert_eq!(failure.stage, JobStage::ConfidenceGating);
    assert_eq!(pipeline.invoices.count().await, 0);
}
