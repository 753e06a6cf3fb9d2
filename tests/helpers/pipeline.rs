use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use invoice_copilot::application::ports::{CatalogIndex, CatalogRepository};
use invoice_copilot::application::services::{
    CatalogService, CommitRules, EntityResolver, ExtractionOrchestrator, ExtractionSettings,
    InvoiceCommitTool, JobLedger, ResolutionThresholds, StreamCoordinator,
};
use invoice_copilot::domain::{
    CatalogEntity, DocumentRef, Embedding, EntityKind, Job, JobId, StreamEvent, UserId,
};
use invoice_copilot::infrastructure::persistence::{
    InMemoryCatalogIndex, InMemoryCatalogRepository, InMemoryInvoiceRepository,
    InMemoryJobRepository,
};

use super::mocks::{MockLlmClient, PinnedEmbedder, StaticDocumentStore, test_retry};

/// Extraction pipeline over in-memory adapters with a scripted model.
pub struct TestPipeline {
    pub jobs: Arc<InMemoryJobRepository>,
    pub catalog: Arc<InMemoryCatalogRepository>,
    pub invoices: Arc<InMemoryInvoiceRepository>,
    pub index: Arc<InMemoryCatalogIndex>,
    pub ledger: Arc<JobLedger>,
    pub catalog_service: Arc<CatalogService>,
    pub resolver: Arc<EntityResolver>,
    pub commit_tool: Arc<InvoiceCommitTool>,
    pub orchestrator: Arc<ExtractionOrchestrator>,
    pub llm: Arc<MockLlmClient>,
}

impl TestPipeline {
    pub fn new(llm: MockLlmClient, embedder: PinnedEmbedder) -> Self {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let catalog = Arc::new(InMemoryCatalogRepository::new());
        let invoices = Arc::new(InMemoryInvoiceRepository::new());
        let index = Arc::new(InMemoryCatalogIndex::new());
        let embedder = Arc::new(embedder);
        let llm = Arc::new(llm);

        let coordinator = Arc::new(StreamCoordinator::new(256, Duration::from_secs(60)));
        let ledger = Arc::new(JobLedger::new(jobs.clone(), coordinator));
        let catalog_service = Arc::new(CatalogService::new(
            catalog.clone(),
            index.clone(),
            embedder.clone(),
            test_retry(),
        ));
        let resolver = Arc::new(EntityResolver::new(
            embedder,
            index.clone(),
            catalog.clone(),
            ResolutionThresholds::default(),
            test_retry(),
        ));
        let settings = ExtractionSettings::default();
        let commit_tool = Arc::new(InvoiceCommitTool::new(
            jobs.clone(),
            Arc::clone(&catalog_service),
            catalog.clone(),
            invoices.clone(),
            CommitRules {
                min_line_confidence: settings.confidence.min_line_confidence,
                totals_tolerance: Decimal::new(1, 2),
            },
        ));
        let orchestrator = Arc::new(ExtractionOrchestrator::new(
            Arc::clone(&ledger),
            Arc::new(StaticDocumentStore),
            llm.clone(),
            Arc::clone(&resolver),
            Arc::clone(&commit_tool),
            settings,
            test_retry(),
        ));

        Self {
            jobs,
            catalog,
            invoices,
            index,
            ledger,
            catalog_service,
            resolver,
            commit_tool,
            orchestrator,
            llm,
        }
    }

    /// Inserts a catalog entity with a hand-picked vector.
    pub async fn seed_entity(&self, kind: EntityKind, name: &str, vector: Vec<f32>) -> CatalogEntity {
        let (entity, _) = self
            .catalog
            .create_or_get(&CatalogEntity::new(kind, name, None))
            .await
            .expect("Failed to seed catalog entity");
        self.index
            .upsert(&entity, &Embedding::new(vector))
            .await
            .expect("Failed to index catalog entity");
        entity
    }

    pub async fn submit(&self, user_id: UserId) -> Job {
        self.submit_document(user_id, "uploads/invoice.pdf").await
    }

    pub async fn submit_document(&self, user_id: UserId, handle: &str) -> Job {
        self.ledger
            .create(
                user_id,
                DocumentRef::new(handle, "application/pdf").with_filename("invoice.pdf"),
            )
            .await
            .expect("Failed to create job")
    }

    /// Polls the ledger until the job reaches a terminal status.
    pub async fn wait_until_finished(&self, job_id: JobId) -> Job {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = self
                    .ledger
                    .find(job_id)
                    .await
                    .expect("Failed to read job")
                    .expect("Job not found");
                if job.status.is_terminal() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Job did not finish")
    }

    /// Every event recorded for the job so far, ending at its terminal event.
    pub async fn events(&self, job: &Job) -> Vec<StreamEvent> {
        use futures::StreamExt;

        let subscription = self
            .ledger
            .subscribe(job.id, job.user_id, 0)
            .await
            .expect("Failed to subscribe to job");
        tokio::time::timeout(
            Duration::from_secs(5),
            subscription.into_stream().collect::<Vec<_>>(),
        )
        .await
        .expect("Job stream did not terminate")
    }
}
