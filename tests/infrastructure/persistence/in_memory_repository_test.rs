use invoice_copilot::application::ports::{CatalogRepository, JobRepository};
use invoice_copilot::domain::{
    CatalogEntity, DocumentRef, EntityKind, FailureKind, Job, JobFailure, JobStage, JobStatus,
    UserId,
};
use invoice_copilot::infrastructure::persistence::{
    InMemoryCatalogRepository, InMemoryJobRepository,
};

#[tokio::test]
async fn given_running_job_when_advancing_backward_then_rejected() {
    let repo = InMemoryJobRepository::new();
    let job = Job::new(UserId::new(), DocumentRef::new("a.png", "image/png"));
    repo.create(&job).await.unwrap();
    repo.mark_running(job.id).await.unwrap();

    assert!(repo.advance(job.id, JobStage::Validation, 70, None).await.unwrap());
    assert!(!repo.advance(job.id, JobStage::EntityResolution, 80, None).await.unwrap());
    assert!(!repo.advance(job.id, JobStage::Validation, 60, None).await.unwrap());

    let stored = repo.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.stage, JobStage::Validation);
    assert_eq!(stored.progress, 70);
}

#[tokio::test]
async fn given_pending_job_when_failing_then_job_stays_pending() {
    let repo = InMemoryJobRepository::new();
    let job = Job::new(UserId::new(), DocumentRef::new("a.png", "image/png"));
    repo.create(&job).await.unwrap();

    let failure = JobFailure::new(FailureKind::Extraction, JobStage::Queued, "never ran");
    let applied = repo.fail(job.id, &failure).await.unwrap();

    assert!(!applied);
    let stored = repo.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert!(stored.error.is_none());
}

#[tokio::test]
async fn given_same_normalized_name_when_creating_twice_then_one_entity_survives() {
    let repo = InMemoryCatalogRepository::new();
    let first = CatalogEntity::new(EntityKind::Company, "Acme, Inc.", None);
    let second = CatalogEntity::new(EntityKind::Company, "ACME inc", None);

    let (a, created_a) = repo.create_or_get(&first).await.unwrap();
    let (b, created_b) = repo.create_or_get(&second).await.unwrap();

    assert!(created_a);
    assert!(!created_b);
    assert_eq!(a.id, b.id);
    assert_eq!(repo.list(EntityKind::Company).await.unwrap().len(), 1);
}
