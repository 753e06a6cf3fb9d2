use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;

use invoice_copilot::application::ports::{
    CatalogRepository, ConversationRepository, InvoiceRepository, JobFilter, JobRepository,
    Pagination, SqlExecutor, SqlExecutorError,
};
use invoice_copilot::application::services::{ScopePolicy, scope_query};
use invoice_copilot::domain::{
    CatalogEntity, ComputedTotals, Conversation, DocumentRef, EntityKind, ExtractedInvoice,
    FailureKind, InvoiceHeader, Job, JobFailure, JobStage, JobStatus, LineItem, Message,
    MessageRole, StatedTotals, UserId,
};

use crate::helpers::TestPostgres;

fn pdf_job(user_id: UserId) -> Job {
    Job::new(
        user_id,
        DocumentRef::new("uploads/invoice.pdf", "application/pdf"),
    )
}

fn invoice_for(job: &Job, total: i64) -> ExtractedInvoice {
    invoice_dated(job, total, "2026-09-30")
}

fn invoice_dated(job: &Job, total: i64, invoice_date: &str) -> ExtractedInvoice {
    let amount = Decimal::from(total);
    ExtractedInvoice {
        id: uuid::Uuid::new_v4(),
        job_id: job.id,
        user_id: job.user_id,
        header: InvoiceHeader {
            vendor_name: "Acme Supplies".to_string(),
            invoice_number: Some("INV-1".to_string()),
            invoice_date: Some(invoice_date.to_string()),
            salesperson: None,
            currency: Some("EUR".to_string()),
        },
        vendor_id: None,
        salesperson_id: None,
        stated_totals: StatedTotals {
            subtotal: None,
            tax: None,
            total: amount,
        },
        computed_totals: ComputedTotals {
            subtotal: amount,
            tax: Decimal::ZERO,
            total: amount,
        },
        line_items: vec![LineItem {
            position: 1,
            description: "Widget A".to_string(),
            quantity: Decimal::ONE,
            unit_price: amount,
            line_total: amount,
            product_id: None,
            create_product: false,
            confidence: 0.9,
            matched_by_embedding: false,
            flags: Vec::new(),
        }],
        flagged_items: Vec::new(),
        created_at: chrono::Utc::now(),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn given_job_lifecycle_when_transitioning_then_guards_reject_invalid_moves() {
    let test_pg = TestPostgres::new().await;
    let repo = &test_pg.job_repository;
    let job = pdf_job(UserId::new());
    repo.create(&job).await.expect("Failed to create job");

    assert!(repo.mark_running(job.id).await.unwrap());
    assert!(!repo.mark_running(job.id).await.unwrap());
    assert!(repo.advance(job.id, JobStage::Validation, 70, None).await.unwrap());
    assert!(!repo
        .advance(job.id, JobStage::EntityResolution, 30, None)
        .await
        .unwrap());
    assert!(repo.complete(job.id, &json!({ "ok": true })).await.unwrap());

    let failure = JobFailure::new(FailureKind::Validation, JobStage::Commit, "late");
    assert!(!repo.fail(job.id, &failure).await.unwrap());
    assert!(!repo.advance(job.id, JobStage::Commit, 95, None).await.unwrap());

    let stored = repo.get_by_id(job.id).await.unwrap().expect("Job not found");
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn given_pending_job_when_failing_then_row_is_unchanged() {
    let test_pg = TestPostgres::new().await;
    let repo = &test_pg.job_repository;
    let job = pdf_job(UserId::new());
    repo.create(&job).await.expect("Failed to create job");

    let failure = JobFailure::new(FailureKind::Extraction, JobStage::Queued, "never ran");
    let applied = repo.fail(job.id, &failure).await.unwrap();

    assert!(!applied);
    let stored = repo.get_by_id(job.id).await.unwrap().expect("Job not found");
    assert_eq!(stored.status, JobStatus::Pending);
    assert!(stored.error.is_none());
    assert!(stored.completed_at.is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn given_finished_jobs_when_listing_then_filters_and_unread_count_apply() {
    let test_pg = TestPostgres::new().await;
    let repo = &test_pg.job_repository;
    let user_id = UserId::new();
    let done = pdf_job(user_id);
    let pending = pdf_job(user_id);
    repo.create(&done).await.unwrap();
    repo.create(&pending).await.unwrap();
    repo.mark_running(done.id).await.unwrap();
    repo.complete(done.id, &json!({})).await.unwrap();

    let completed = repo
        .list_for_user(
            user_id,
            &JobFilter {
                status: Some(JobStatus::Completed),
                ..JobFilter::default()
            },
            Pagination::new(1, 10),
        )
        .await
        .unwrap();
    let unread_before = repo.unread_count(user_id).await.unwrap();
    assert!(repo.mark_read(done.id, user_id).await.unwrap());
    assert!(!repo.mark_read(done.id, UserId::new()).await.unwrap());
    let unread_after = repo.unread_count(user_id).await.unwrap();

    assert_eq!(completed.total, 1);
    assert_eq!(completed.items[0].id, done.id);
    assert_eq!(unread_before, 1);
    assert_eq!(unread_after, 0);
    let unfinished = repo.list_unfinished().await.unwrap();
    assert_eq!(unfinished.iter().map(|j| j.id).collect::<Vec<_>>(), vec![pending.id]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn given_concurrent_creates_with_same_name_when_storing_then_one_entity_survives() {
    let test_pg = TestPostgres::new().await;
    let repo = &test_pg.catalog_repository;
    let first = CatalogEntity::new(EntityKind::Company, "Globex Trading", None);
    let second = CatalogEntity::new(EntityKind::Company, "  globex   TRADING ", None);

    let (a, b) = tokio::join!(repo.create_or_get(&first), repo.create_or_get(&second));
    let (a, a_created) = a.unwrap();
    let (b, b_created) = b.unwrap();

    assert_eq!(a.id, b.id);
    assert!(a_created ^ b_created);
    assert_eq!(repo.list(EntityKind::Company).await.unwrap().len(), 1);
    let same_name_product = CatalogEntity::new(EntityKind::Product, "Globex Trading", None);
    let (_, created) = repo.create_or_get(&same_name_product).await.unwrap();
    assert!(created);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn given_appended_messages_when_reading_then_positions_increase_in_order() {
    let test_pg = TestPostgres::new().await;
    let repo = &test_pg.conversation_repository;
    let conversation = Conversation::new(UserId::new(), Some("Spending".to_string()));
    repo.create_conversation(&conversation).await.unwrap();

    for (role, text) in [
        (MessageRole::User, "How much did I spend?"),
        (MessageRole::Assistant, "You spent 30.00."),
        (MessageRole::User, "And last month?"),
    ] {
        repo.append_message(&Message::new(conversation.id, role, text.to_string()))
            .await
            .unwrap();
    }

    let messages = repo.get_messages(conversation.id, 10).await.unwrap();
    let positions: Vec<i64> = messages.iter().map(|m| m.position).collect();
    assert_eq!(messages.len(), 3);
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(messages[2].content, "And last month?");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn given_invoices_of_two_users_when_running_scoped_query_then_only_callers_rows_return() {
    let test_pg = TestPostgres::new().await;
    let user_a = UserId::new();
    let user_b = UserId::new();
    let job_a = pdf_job(user_a);
    let job_b = pdf_job(user_b);
    for job in [&job_a, &job_b] {
        test_pg.job_repository.create(job).await.unwrap();
    }
    let invoice_a = invoice_for(&job_a, 30);
    test_pg.invoice_repository.insert(&invoice_a).await.unwrap();
    test_pg
        .invoice_repository
        .insert(&invoice_for(&job_b, 500))
        .await
        .unwrap();

    let policy = ScopePolicy::invoice_schema();
    let all_rows = scope_query("SELECT id FROM invoices", user_a, &policy).unwrap();
    let forged = scope_query(
        &format!("SELECT id FROM invoices WHERE user_id = '{}'", user_b),
        user_a,
        &policy,
    )
    .unwrap();

    let visible = test_pg
        .sql_executor
        .execute_read(&all_rows.sql, 100, Duration::from_secs(5))
        .await
        .unwrap();
    let foreign = test_pg
        .sql_executor
        .execute_read(&forged.sql, 100, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(visible.columns, vec!["id".to_string()]);
    assert_eq!(visible.rows, vec![vec![json!(invoice_a.id.to_string())]]);
    assert!(foreign.rows.is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn given_committed_invoice_when_inserting_again_then_second_insert_fails() {
    let test_pg = TestPostgres::new().await;
    let job = pdf_job(UserId::new());
    test_pg.job_repository.create(&job).await.unwrap();
    let invoice = invoice_for(&job, 30);

    test_pg.invoice_repository.insert(&invoice).await.unwrap();
    let duplicate = test_pg.invoice_repository.insert(&invoice_for(&job, 30)).await;
    let stored = test_pg
        .invoice_repository
        .find_by_job(job.id)
        .await
        .unwrap()
        .expect("Invoice not found");

    assert!(duplicate.is_err());
    assert_eq!(stored.id, invoice.id);
    assert_eq!(stored.line_items.len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn given_free_text_invoice_date_when_storing_then_date_is_left_empty() {
    let test_pg = TestPostgres::new().await;
    let user_id = UserId::new();
    let iso_job = pdf_job(user_id);
    let prose_job = pdf_job(user_id);
    for job in [&iso_job, &prose_job] {
        test_pg.job_repository.create(job).await.unwrap();
    }

    test_pg
        .invoice_repository
        .insert(&invoice_dated(&iso_job, 30, " 2024-03-15 "))
        .await
        .unwrap();
    test_pg
        .invoice_repository
        .insert(&invoice_dated(&prose_job, 30, "March 15th"))
        .await
        .unwrap();

    let iso = test_pg.invoice_repository.find_by_job(iso_job.id).await.unwrap().unwrap();
    let prose = test_pg.invoice_repository.find_by_job(prose_job.id).await.unwrap().unwrap();
    assert_eq!(iso.header.invoice_date.as_deref(), Some("2024-03-15"));
    assert_eq!(prose.header.invoice_date, None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn given_join_with_repeated_column_names_when_executing_then_query_is_rejected() {
    let test_pg = TestPostgres::new().await;
    let user_id = UserId::new();
    let job = pdf_job(user_id);
    test_pg.job_repository.create(&job).await.unwrap();
    let invoice = invoice_for(&job, 30);
    test_pg.invoice_repository.insert(&invoice).await.unwrap();
    let policy = ScopePolicy::invoice_schema();

    let ambiguous = scope_query(
        "SELECT i.id, l.id FROM invoices i JOIN invoice_line_items l ON l.invoice_id = i.id",
        user_id,
        &policy,
    )
    .unwrap();
    let aliased = scope_query(
        "SELECT i.total, i.id AS invoice_id, l.id AS line_id \
         FROM invoices i JOIN invoice_line_items l ON l.invoice_id = i.id",
        user_id,
        &policy,
    )
    .unwrap();

    let rejected = test_pg
        .sql_executor
        .execute_read(&ambiguous.sql, 100, Duration::from_secs(5))
        .await;
    let accepted = test_pg
        .sql_executor
        .execute_read(&aliased.sql, 100, Duration::from_secs(5))
        .await
        .unwrap();

    assert!(
        matches!(&rejected, Err(SqlExecutorError::DuplicateColumn(name)) if name == "id"),
        "{rejected:?}"
    );
    assert_eq!(
        accepted.columns,
        vec!["total".to_string(), "invoice_id".to_string(), "line_id".to_string()]
    );
    assert_eq!(accepted.rows.len(), 1);
    assert_eq!(accepted.rows[0][1], json!(invoice.id.to_string()));
}
