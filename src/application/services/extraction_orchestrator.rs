use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity_resolver::EntityResolver;
use super::extraction_parser::{EXTRACTION_INSTRUCTIONS, parse_extraction};
use super::invoice_commit_tool::{CommitCommand, CommitError, CommitReceipt, InvoiceCommitTool};
use super::job_ledger::{JobLedger, LedgerError};
use super::retry::RetryPolicy;
use crate::application::ports::{DocumentStore, DocumentStoreError, LlmClient};
use crate::domain::{
    CatalogEntityId, ComputedTotals, DocumentContent, EntityKind, ExtractedInvoice,
    ExtractionDraft, FailureKind, InvoiceHeader, Job, JobFailure, JobId, JobStage, JobStatus,
    LineFlag, LineItem, MatchKind, Resolution, StatedTotals, reconcile_totals,
};

/// Weights for the per-line confidence score.
#[derive(Debug, Clone, Copy)]
pub struct ConfidencePolicy {
    pub model_weight: f32,
    pub resolution_weight: f32,
    /// Resolution quality credited to a line that will become a new catalog
    /// entry.
    pub new_entry_quality: f32,
    pub min_line_confidence: f32,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            model_weight: 0.5,
            resolution_weight: 0.5,
            new_entry_quality: 0.75,
            min_line_confidence: 0.7,
        }
    }
}

impl ConfidencePolicy {
    pub fn line_confidence(&self, model_confidence: f32, resolution: &Resolution) -> f32 {
        let quality = match resolution.match_kind {
            MatchKind::Exact => 1.0,
            MatchKind::Similarity | MatchKind::Candidate => resolution.score,
            MatchKind::NoMatch => self.new_entry_quality,
        };
        let total_weight = self.model_weight + self.resolution_weight;
        if total_weight <= 0.0 {
            return model_confidence.clamp(0.0, 1.0);
        }
        ((self.model_weight * model_confidence + self.resolution_weight * quality) / total_weight)
            .clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub confidence: ConfidencePolicy,
    pub totals_tolerance: Decimal,
    /// Extra analysis attempts when the model output cannot be parsed.
    pub parse_retries: u32,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            confidence: ConfidencePolicy::default(),
            totals_tolerance: Decimal::new(1, 2),
            parse_retries: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDraft {
    pub draft: ExtractionDraft,
    pub vendor: Option<Resolution>,
    pub salesperson: Option<Resolution>,
    /// One resolution per draft line, same order.
    pub lines: Vec<Resolution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatedDraft {
    pub header: InvoiceHeader,
    pub totals: StatedTotals,
    pub vendor: Option<Resolution>,
    pub salesperson: Option<Resolution>,
    pub committed: Vec<LineItem>,
    pub flagged: Vec<LineItem>,
}

/// Output of the last durably finished stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Checkpoint {
    Analyzed { draft: ExtractionDraft },
    Resolved { resolved: ResolvedDraft },
    Gated { gated: GatedDraft },
    Validated { gated: GatedDraft, computed: ComputedTotals },
}

impl Checkpoint {
    fn next_stage(checkpoint: Option<&Checkpoint>) -> JobStage {
        match checkpoint {
            None => JobStage::DocumentAnalysis,
            Some(Checkpoint::Analyzed { .. }) => JobStage::EntityResolution,
            Some(Checkpoint::Resolved { .. }) => JobStage::ConfidenceGating,
            Some(Checkpoint::Gated { .. }) => JobStage::Validation,
            Some(Checkpoint::Validated { .. }) => JobStage::Commit,
        }
    }
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(Box<ExtractedInvoice>),
    Failed(JobFailure),
    AlreadyFinished(JobStatus),
}

enum StageOutput {
    Checkpoint(Checkpoint),
    Committed(Box<ExtractedInvoice>),
}

/// Drives a job through analysis, resolution, gating, validation and
/// commit. Each finished stage is checkpointed in the ledger so a restarted
/// run continues from the last completed stage.
pub struct ExtractionOrchestrator {
    ledger: Arc<JobLedger>,
    documents: Arc<dyn DocumentStore>,
    llm_client: Arc<dyn LlmClient>,
    resolver: Arc<EntityResolver>,
    commit_tool: Arc<InvoiceCommitTool>,
    settings: ExtractionSettings,
    retry: RetryPolicy,
}

impl ExtractionOrchestrator {
    pub fn new(
        ledger: Arc<JobLedger>,
        documents: Arc<dyn DocumentStore>,
        llm_client: Arc<dyn LlmClient>,
        resolver: Arc<EntityResolver>,
        commit_tool: Arc<InvoiceCommitTool>,
        settings: ExtractionSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            documents,
            llm_client,
            resolver,
            commit_tool,
            settings,
            retry,
        }
    }

    pub async fn run(&self, job_id: JobId) -> Result<JobOutcome, ExtractionError> {
        let job = self
            .ledger
            .find(job_id)
            .await?
            .ok_or(ExtractionError::NotFound(job_id))?;
        tracing::Span::current().record("user_id", tracing::field::display(job.user_id));
        if job.status.is_terminal() {
            return Ok(JobOutcome::AlreadyFinished(job.status));
        }
        if job.status == JobStatus::Pending && !self.ledger.start(job_id).await? {
            let current = self.ledger.find(job_id).await?;
            if let Some(current) = current.filter(|j| j.status.is_terminal()) {
                return Ok(JobOutcome::AlreadyFinished(current.status));
            }
        }

        let mut checkpoint = restore_checkpoint(&job);
        loop {
            let stage = Checkpoint::next_stage(checkpoint.as_ref());

            if self.ledger.is_abandon_requested(job_id).await? {
                let failure = JobFailure::new(FailureKind::Cancelled, stage, "abandoned on request");
                self.ledger.fail(job_id, &failure).await?;
                return Ok(JobOutcome::Failed(failure));
            }

            self.ledger
                .advance(job_id, stage, stage.started_progress(), None)
                .await?;

            match self.run_stage(&job, stage, checkpoint.take()).await {
                Ok(StageOutput::Checkpoint(next)) => {
                    let value = serde_json::to_value(&next)
                        .map_err(|e| ExtractionError::Checkpoint(e.to_string()))?;
                    self.ledger
                        .advance(job_id, stage, stage.completed_progress(), Some(&value))
                        .await?;
                    checkpoint = Some(next);
                }
                Ok(StageOutput::Committed(invoice)) => {
                    let result = serde_json::to_value(invoice.as_ref())
                        .map_err(|e| ExtractionError::Checkpoint(e.to_string()))?;
                    self.ledger.complete(job_id, &result).await?;
                    return Ok(JobOutcome::Completed(invoice));
                }
                Err(failure) => {
                    self.ledger.fail(job_id, &failure).await?;
                    return Ok(JobOutcome::Failed(failure));
                }
            }
        }
    }

    async fn run_stage(
        &self,
        job: &Job,
        stage: JobStage,
        checkpoint: Option<Checkpoint>,
    ) -> Result<StageOutput, JobFailure> {
        tracing::debug!(job_id = %job.id, stage = %stage, "Stage started");
        let output = match checkpoint {
            None => {
                let draft = self.analyze(job).await?;
                Checkpoint::Analyzed { draft }
            }
            Some(Checkpoint::Analyzed { draft }) => {
                let resolved = self.resolve(draft).await?;
                Checkpoint::Resolved { resolved }
            }
            Some(Checkpoint::Resolved { resolved }) => Checkpoint::Gated {
                gated: self.gate(resolved)?,
            },
            Some(Checkpoint::Gated { gated }) => {
                let computed = self.validate(&gated)?;
                Checkpoint::Validated { gated, computed }
            }
            Some(Checkpoint::Validated { gated, computed }) => {
                let invoice = self.commit(job, gated, computed).await?;
                return Ok(StageOutput::Committed(Box::new(invoice)));
            }
        };
        Ok(StageOutput::Checkpoint(output))
    }

    async fn analyze(&self, job: &Job) -> Result<ExtractionDraft, JobFailure> {
        let stage = JobStage::DocumentAnalysis;
        let content_type = job.document.content_type().ok_or_else(|| {
            JobFailure::new(
                FailureKind::Extraction,
                stage,
                format!("unsupported document type {}", job.document.mime_type),
            )
        })?;

        let data = self
            .retry
            .call("document_fetch", || self.documents.fetch(&job.document))
            .await
            .map_err(|e| {
                let kind = match &e {
                    super::retry::CallError::Failed {
                        error: DocumentStoreError::NotFound(_) | DocumentStoreError::InvalidHandle(_),
                        ..
                    } => FailureKind::Extraction,
                    _ => FailureKind::TransientInfra,
                };
                JobFailure::new(kind, stage, e.to_string())
            })?;

        let document = DocumentContent {
            content_type,
            filename: job.document.filename.clone(),
            data,
        };

        let mut last_error = String::new();
        for attempt in 0..=self.settings.parse_retries {
            let raw = self
                .retry
                .call("document_analysis", || {
                    self.llm_client
                        .analyze_document(EXTRACTION_INSTRUCTIONS, &document)
                })
                .await
                .map_err(|e| {
                    let kind = if e.is_infrastructure() {
                        FailureKind::TransientInfra
                    } else {
                        FailureKind::Extraction
                    };
                    JobFailure::new(kind, stage, e.to_string())
                })?;

            match parse_extraction(&raw) {
                Ok(draft) => {
                    tracing::info!(
                        job_id = %job.id,
                        lines = draft.line_items.len(),
                        "Document analyzed"
                    );
                    return Ok(draft);
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, attempt, error = %e, "Unusable extraction output");
                    last_error = e.to_string();
                }
            }
        }

        Err(JobFailure::new(FailureKind::Extraction, stage, last_error))
    }

    async fn resolve(&self, draft: ExtractionDraft) -> Result<ResolvedDraft, JobFailure> {
        let infra = |e: super::entity_resolver::ResolutionError| {
            JobFailure::new(FailureKind::TransientInfra, JobStage::EntityResolution, e.to_string())
        };

        let vendor = match draft.header.vendor_name.trim() {
            "" => None,
            name => Some(
                self.resolver
                    .resolve(EntityKind::Company, name)
                    .await
                    .map_err(infra)?,
            ),
        };
        let salesperson = match draft.header.salesperson.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => Some(
                self.resolver
                    .resolve(EntityKind::Salesperson, name)
                    .await
                    .map_err(infra)?,
            ),
        };

        let mut lines = Vec::with_capacity(draft.line_items.len());
        for item in &draft.line_items {
            lines.push(
                self.resolver
                    .resolve(EntityKind::Product, &item.description)
                    .await
                    .map_err(infra)?,
            );
        }

        Ok(ResolvedDraft {
            draft,
            vendor,
            salesperson,
            lines,
        })
    }

    /// Scores every line and splits them into committed and flagged.
    fn gate(&self, resolved: ResolvedDraft) -> Result<GatedDraft, JobFailure> {
        let policy = self.settings.confidence;
        let mut committed = Vec::new();
        let mut flagged = Vec::new();

        for (index, (item, resolution)) in resolved
            .draft
            .line_items
            .iter()
            .zip(resolved.lines.iter())
            .enumerate()
        {
            let confidence = policy.line_confidence(item.model_confidence, resolution);
            let mut flags = Vec::new();
            match resolution.match_kind {
                MatchKind::Candidate => {
                    if let Some(candidate) = resolution.candidate_entity() {
                        flags.push(LineFlag::NeedsReview {
                            candidate,
                            score: resolution.score,
                        });
                    }
                }
                MatchKind::NoMatch => flags.push(LineFlag::NewCatalogEntry),
                MatchKind::Exact | MatchKind::Similarity => {}
            }

            let below_minimum = confidence < policy.min_line_confidence;
            if below_minimum {
                flags.push(LineFlag::LowConfidence {
                    confidence,
                    minimum: policy.min_line_confidence,
                });
            }

            let position = (index + 1) as u32;
            let line_total = item.line_total().ok_or_else(|| {
                JobFailure::new(
                    FailureKind::Validation,
                    JobStage::ConfidenceGating,
                    format!("line {} amount exceeds the supported range", position),
                )
            })?;
            let line = LineItem {
                position,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total,
                product_id: resolution.accepted_entity(),
                create_product: resolution.match_kind == MatchKind::NoMatch,
                confidence,
                matched_by_embedding: resolution.matched_by_embedding(),
                flags,
            };
            if below_minimum {
                flagged.push(line);
            } else {
                committed.push(line);
            }
        }

        Ok(GatedDraft {
            header: resolved.draft.header,
            totals: resolved.draft.totals,
            vendor: resolved.vendor,
            salesperson: resolved.salesperson,
            committed,
            flagged,
        })
    }

    fn validate(&self, gated: &GatedDraft) -> Result<ComputedTotals, JobFailure> {
        let stage = JobStage::Validation;
        if gated.committed.is_empty() {
            return Err(JobFailure::new(
                FailureKind::Validation,
                stage,
                format!(
                    "no line items passed confidence gating ({} flagged)",
                    gated.flagged.len()
                ),
            ));
        }
        reconcile_totals(&gated.committed, &gated.totals, self.settings.totals_tolerance)
            .map_err(|e| JobFailure::new(FailureKind::Validation, stage, e.to_string()))
    }

    async fn commit(
        &self,
        job: &Job,
        gated: GatedDraft,
        computed: ComputedTotals,
    ) -> Result<ExtractedInvoice, JobFailure> {
        let vendor_id = self
            .entity_for(gated.vendor.as_ref(), EntityKind::Company)
            .await?;
        let salesperson_id = self
            .entity_for(gated.salesperson.as_ref(), EntityKind::Salesperson)
            .await?;

        let mut line_items = gated.committed;
        for line in line_items.iter_mut().filter(|l| l.create_product) {
            let entity_id = self
                .create_entity(EntityKind::Product, &line.description)
                .await?;
            line.product_id = Some(entity_id);
            line.create_product = false;
        }

        let mut invoice = ExtractedInvoice {
            id: Uuid::new_v4(),
            job_id: job.id,
            user_id: job.user_id,
            header: gated.header,
            vendor_id,
            salesperson_id,
            stated_totals: gated.totals,
            computed_totals: computed,
            line_items,
            flagged_items: gated.flagged,
            created_at: Utc::now(),
        };

        let receipt = self
            .commit_tool
            .execute(CommitCommand::InsertValidatedInvoice(Box::new(invoice.clone())))
            .await
            .map_err(commit_failure)?;
        if let CommitReceipt::Invoice { invoice_id, .. } = receipt {
            invoice.id = invoice_id;
        }
        Ok(invoice)
    }

    async fn entity_for(
        &self,
        resolution: Option<&Resolution>,
        kind: EntityKind,
    ) -> Result<Option<CatalogEntityId>, JobFailure> {
        let Some(resolution) = resolution else {
            return Ok(None);
        };
        match resolution.match_kind {
            MatchKind::Exact | MatchKind::Similarity => Ok(resolution.entity_id),
            MatchKind::Candidate => Ok(None),
            MatchKind::NoMatch => self.create_entity(kind, &resolution.query).await.map(Some),
        }
    }

    async fn create_entity(&self, kind: EntityKind, name: &str) -> Result<CatalogEntityId, JobFailure> {
        let receipt = self
            .commit_tool
            .execute(CommitCommand::CreateCatalogEntity {
                kind,
                name: name.to_string(),
            })
            .await
            .map_err(commit_failure)?;
        match receipt {
            CommitReceipt::Entity { entity, .. } => Ok(entity.id),
            CommitReceipt::Invoice { .. } => Err(JobFailure::new(
                FailureKind::Validation,
                JobStage::Commit,
                "unexpected commit receipt",
            )),
        }
    }
}

fn commit_failure(error: CommitError) -> JobFailure {
    let kind = match &error {
        CommitError::Rejected(_) => FailureKind::Validation,
        CommitError::Repository(_) | CommitError::Catalog(_) => FailureKind::TransientInfra,
    };
    JobFailure::new(kind, JobStage::Commit, error.to_string())
}

fn restore_checkpoint(job: &Job) -> Option<Checkpoint> {
    let value = job.checkpoint.as_ref()?;
    match serde_json::from_value(value.clone()) {
        Ok(checkpoint) => {
            tracing::info!(job_id = %job.id, stage = %job.stage, "Resuming job from checkpoint");
            Some(checkpoint)
        }
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "Unreadable checkpoint, restarting job");
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("checkpoint encoding: {0}")]
    Checkpoint(String),
}
