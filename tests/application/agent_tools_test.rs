use std::sync::Arc;
use std::time::Duration;

use invoice_copilot::application::services::{
    AgentTool, AgentToolbox, JobLedger, LedgerError, StreamCoordinator, ToolError,
};
use invoice_copilot::domain::{DocumentRef, Identity, Intent, JobId, UserId};
use invoice_copilot::infrastructure::persistence::InMemoryJobRepository;

use crate::helpers::{MockLlmClient, test_retry};

fn ledger() -> Arc<JobLedger> {
    Arc::new(JobLedger::new(
        Arc::new(InMemoryJobRepository::new()),
        Arc::new(StreamCoordinator::new(16, Duration::from_secs(60))),
    ))
}

fn toolbox(llm: MockLlmClient, ledger: &Arc<JobLedger>) -> AgentToolbox {
    AgentToolbox::new(Arc::new(llm), Arc::clone(ledger), test_retry())
}

#[tokio::test]
async fn given_fenced_tool_json_when_planning_then_tool_is_selected() {
    let id = JobId::new();
    let llm = MockLlmClient::new()
        .with_completion(format!(
            "```json\n{{\"tool\": \"job_status\", \"job_id\": \"{}\"}}\n```",
            id
        ))
        .with_completion(r#"{"tool": "list_recent_jobs"}"#);
    let toolbox = toolbox(llm, &ledger());

    assert_eq!(
        toolbox.plan("how is my upload?", Intent::StatusCheck).await,
        AgentTool::JobStatus { job_id: id }
    );
    assert_eq!(
        toolbox.plan("what did I upload?", Intent::StatusCheck).await,
        AgentTool::ListRecentJobs { limit: 5 }
    );
}

#[tokio::test]
async fn given_unknown_tool_when_planning_then_recent_jobs_are_listed() {
    let llm = MockLlmClient::new().with_completion(r#"{"tool": "delete_everything"}"#);

    let tool = toolbox(llm, &ledger())
        .plan("wipe it all", Intent::ActionRequest)
        .await;

    assert_eq!(tool, AgentTool::ListRecentJobs { limit: 5 });
}

#[tokio::test]
async fn given_action_with_job_id_and_model_error_when_planning_then_job_is_marked_read() {
    let id = JobId::new();
    let llm = MockLlmClient::new().with_failed_completion();

    let tool = toolbox(llm, &ledger())
        .plan(&format!("please mark {} as read", id), Intent::ActionRequest)
        .await;

    assert_eq!(tool, AgentTool::MarkJobRead { job_id: id });
}

#[tokio::test]
async fn given_status_check_when_model_proposes_mark_read_then_status_is_shown_instead() {
    let id = JobId::new();
    let llm = MockLlmClient::new().with_completion(format!(
        "{{\"tool\": \"mark_job_read\", \"job_id\": \"{}\"}}",
        id
    ));

    let tool = toolbox(llm, &ledger())
        .plan(&format!("is {} done?", id), Intent::StatusCheck)
        .await;

    assert_eq!(tool, AgentTool::JobStatus { job_id: id });
}

#[tokio::test]
async fn given_other_users_job_when_executing_status_then_not_found() {
    let ledger = ledger();
    let owner = UserId::new();
    let job = ledger
        .create(owner, DocumentRef::new("uploads/a.pdf", "application/pdf"))
        .await
        .unwrap();
    let toolbox = toolbox(MockLlmClient::new(), &ledger);

    let own = toolbox
        .execute(Identity::user(owner), &AgentTool::JobStatus { job_id: job.id })
        .await
        .unwrap();
    let other = toolbox
        .execute(
            Identity::user(UserId::new()),
            &AgentTool::JobStatus { job_id: job.id },
        )
        .await;

    assert_eq!(own.data["id"], serde_json::json!(job.id));
    assert!(matches!(
        other,
        Err(ToolError::Ledger(LedgerError::NotFound(id))) if id == job.id
    ));
}
