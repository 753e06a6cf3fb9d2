use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::job_ledger::{JobLedger, LedgerError};
use super::retry::RetryPolicy;
use crate::application::ports::{JobFilter, LlmClient, Pagination};
use crate::domain::{Identity, Intent, Job, JobId};

const TOOL_INSTRUCTIONS: &str = "Pick the single tool that serves the user's request and reply with JSON only.\n\
{\"tool\": \"list_recent_jobs\", \"limit\": number}: recent uploads and their status.\n\
{\"tool\": \"job_status\", \"job_id\": uuid}: status of one upload.\n\
{\"tool\": \"unread_job_count\"}: how many finished uploads are unread.\n\
{\"tool\": \"mark_job_read\", \"job_id\": uuid}: mark one upload as read.";

static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("Invalid uuid pattern")
});

/// Closed set of operations the chat agent may run for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum AgentTool {
    ListRecentJobs {
        #[serde(default = "default_limit")]
        limit: u32,
    },
    JobStatus {
        job_id: JobId,
    },
    UnreadJobCount,
    MarkJobRead {
        job_id: JobId,
    },
}

fn default_limit() -> u32 {
    5
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub data: serde_json::Value,
    pub summary: String,
}

/// Selects and executes agent tools against the job ledger, always on behalf
/// of the calling identity.
pub struct AgentToolbox {
    llm_client: Arc<dyn LlmClient>,
    ledger: Arc<JobLedger>,
    retry: RetryPolicy,
}

impl AgentToolbox {
    pub fn new(
        llm_client: Arc<dyn LlmClient>,
        ledger: Arc<JobLedger>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            llm_client,
            ledger,
            retry,
        }
    }

    /// A model reply outside the tool set falls back to a per-intent default.
    pub async fn plan(&self, message: &str, intent: Intent) -> AgentTool {
        let raw = self
            .retry
            .call("tool_selection", || {
                self.llm_client.complete(message, TOOL_INSTRUCTIONS)
            })
            .await;

        match raw.ok().and_then(|raw| parse_tool(&raw)) {
            // Status checks never mutate.
            Some(AgentTool::MarkJobRead { .. }) if intent != Intent::ActionRequest => {
                fallback_tool(message, intent)
            }
            Some(tool) => tool,
            None => fallback_tool(message, intent),
        }
    }

    pub async fn execute(&self, identity: Identity, tool: &AgentTool) -> Result<ToolOutput, ToolError> {
        let user_id = identity.user_id;
        match tool {
            AgentTool::ListRecentJobs { limit } => {
                let page = self
                    .ledger
                    .list_for_user(user_id, &JobFilter::default(), Pagination::new(1, *limit))
                    .await?;
                let jobs: Vec<_> = page.items.iter().map(job_summary).collect();
                let summary = match page.items.len() {
                    0 => "You have no uploads yet.".to_string(),
                    n => format!("Showing your {} most recent upload(s) of {}.", n, page.total),
                };
                Ok(ToolOutput {
                    data: json!({ "jobs": jobs, "total": page.total }),
                    summary,
                })
            }
            AgentTool::JobStatus { job_id } => {
                let job = self.ledger.get_for_user(*job_id, user_id).await?;
                let summary = match &job.error {
                    Some(failure) => format!("Upload {} failed: {}", job.id, failure.summary()),
                    None => format!(
                        "Upload {} is {} ({}%, {}).",
                        job.id,
                        job.status,
                        job.progress,
                        job.stage.label()
                    ),
                };
                Ok(ToolOutput {
                    data: job_summary(&job),
                    summary,
                })
            }
            AgentTool::UnreadJobCount => {
                let count = self.ledger.unread_count(user_id).await?;
                Ok(ToolOutput {
                    data: json!({ "unread": count }),
                    summary: format!("You have {} unread finished upload(s).", count),
                })
            }
            AgentTool::MarkJobRead { job_id } => {
                self.ledger.mark_read(*job_id, user_id).await?;
                Ok(ToolOutput {
                    data: json!({ "job_id": job_id, "is_read": true }),
                    summary: format!("Marked upload {} as read.", job_id),
                })
            }
        }
    }
}

fn parse_tool(raw: &str) -> Option<AgentTool> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if start > end {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

fn fallback_tool(message: &str, intent: Intent) -> AgentTool {
    let job_id = UUID_PATTERN
        .find(message)
        .and_then(|m| m.as_str().parse::<uuid::Uuid>().ok())
        .map(JobId::from_uuid);
    match (intent, job_id) {
        (Intent::ActionRequest, Some(job_id)) => AgentTool::MarkJobRead { job_id },
        (_, Some(job_id)) => AgentTool::JobStatus { job_id },
        _ => AgentTool::ListRecentJobs {
            limit: default_limit(),
        },
    }
}

fn job_summary(job: &Job) -> serde_json::Value {
    json!({
        "id": job.id,
        "status": job.status,
        "stage": job.stage,
        "progress": job.progress,
        "filename": job.document.filename,
        "is_read": job.is_read,
        "error": job.error,
        "created_at": job.created_at,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}
