use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use super::retry::{CallError, RetryPolicy};
use super::sql_guard::{QueryValidationError, ScopePolicy, scope_query};
use crate::application::ports::{
    LlmClient, LlmClientError, SqlExecutor, SqlExecutorError, TableSchema, TabularResult,
};
use crate::domain::UserId;

static SQL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:sql|SQL|postgresql)?\s*(.*?)\s*```").expect("Invalid SQL block pattern")
});

#[derive(Debug, Clone, Deserialize)]
pub struct ExampleQuery {
    pub question: String,
    pub sql: String,
}

#[derive(Debug, Clone)]
pub struct TextToSqlSettings {
    pub row_cap: usize,
    pub query_timeout: Duration,
    pub examples: Vec<ExampleQuery>,
}

impl Default for TextToSqlSettings {
    fn default() -> Self {
        Self {
            row_cap: 500,
            query_timeout: Duration::from_secs(10),
            examples: vec![
                ExampleQuery {
                    question: "How much did I spend last month?".to_string(),
                    sql: "SELECT SUM(total) AS spent FROM invoices \
                          WHERE invoice_date >= date_trunc('month', now()) - INTERVAL '1 month' \
                          AND invoice_date < date_trunc('month', now())"
                        .to_string(),
                },
                ExampleQuery {
                    question: "Which vendors did I buy the most from?".to_string(),
                    sql: "SELECT c.name, SUM(i.total) AS total FROM invoices i \
                          JOIN catalog_entities c ON c.id = i.vendor_id \
                          GROUP BY c.name ORDER BY total DESC LIMIT 10"
                        .to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqlAnswer {
    /// Query as produced by the model.
    pub generated_sql: String,
    /// Query actually executed, with the user scope applied.
    pub executed_sql: String,
    pub result: TabularResult,
}

/// Natural-language questions to read-only, user-scoped SQL. The model only
/// proposes a query; what runs is the statically validated and rewritten
/// form.
pub struct TextToSqlService {
    llm_client: Arc<dyn LlmClient>,
    executor: Arc<dyn SqlExecutor>,
    policy: ScopePolicy,
    settings: TextToSqlSettings,
    retry: RetryPolicy,
}

impl TextToSqlService {
    pub fn new(
        llm_client: Arc<dyn LlmClient>,
        executor: Arc<dyn SqlExecutor>,
        policy: ScopePolicy,
        settings: TextToSqlSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            llm_client,
            executor,
            policy,
            settings,
            retry,
        }
    }

    pub async fn query(&self, question: &str, user_id: UserId) -> Result<SqlAnswer, TextToSqlError> {
        let generated_sql = self.generate(question).await?;
        let scoped = scope_query(&generated_sql, user_id, &self.policy)?;
        tracing::debug!(
            user_id = %user_id,
            scoped_references = scoped.scoped_references,
            "Generated query validated"
        );

        // A query that hit its timeout would only time out again.
        let execution = RetryPolicy::no_retry(self.settings.query_timeout + Duration::from_secs(2));
        let result = execution
            .call("sql_execute", || {
                self.executor.execute_read(
                    &scoped.sql,
                    self.settings.row_cap,
                    self.settings.query_timeout,
                )
            })
            .await
            .map_err(TextToSqlError::Execution)?;

        Ok(SqlAnswer {
            generated_sql,
            executed_sql: scoped.sql,
            result,
        })
    }

    async fn generate(&self, question: &str) -> Result<String, TextToSqlError> {
        let tables = self.policy.table_names();
        let schema = self
            .retry
            .call("sql_describe", || self.executor.describe(&tables))
            .await
            .map_err(TextToSqlError::Schema)?;

        let instructions = self.build_instructions(&schema);
        let raw = self
            .retry
            .call("sql_generation", || {
                self.llm_client.complete(question, &instructions)
            })
            .await
            .map_err(TextToSqlError::Generation)?;

        let sql = extract_sql(&raw);
        if sql.is_empty() {
            return Err(TextToSqlError::EmptyGeneration);
        }
        Ok(sql)
    }

    fn build_instructions(&self, schema: &[TableSchema]) -> String {
        let mut out = String::from(
            "Write one PostgreSQL SELECT statement that answers the user's question. \
             Reply with the SQL only. Use only these tables and columns:\n",
        );
        for table in schema {
            let columns = table
                .columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.data_type))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("- {}({})\n", table.name, columns));
        }
        out.push_str(
            "Rows are already limited to the current user; never filter by user_id yourself.\n",
        );
        if !self.settings.examples.is_empty() {
            out.push_str("Examples:\n");
            for example in &self.settings.examples {
                out.push_str(&format!("Q: {}\nSQL: {}\n", example.question, example.sql));
            }
        }
        out
    }
}

fn extract_sql(raw: &str) -> String {
    let body = SQL_BLOCK
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);
    body.trim()
        .trim_start_matches("SQL:")
        .trim()
        .to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum TextToSqlError {
    #[error("schema lookup: {0}")]
    Schema(CallError<SqlExecutorError>),
    #[error("generation: {0}")]
    Generation(CallError<LlmClientError>),
    #[error("model returned no query")]
    EmptyGeneration,
    #[error("query rejected: {0}")]
    Validation(#[from] QueryValidationError),
    #[error("execution: {0}")]
    Execution(CallError<SqlExecutorError>),
}

impl TextToSqlError {
    pub fn code(&self) -> &'static str {
        match self {
            TextToSqlError::Validation(_)
            | TextToSqlError::EmptyGeneration
            | TextToSqlError::Execution(CallError::Failed {
                error: SqlExecutorError::DuplicateColumn(_),
                ..
            }) => "query_validation",
            TextToSqlError::Execution(CallError::TimedOut { .. })
            | TextToSqlError::Execution(CallError::Failed {
                error: SqlExecutorError::Timeout(_),
                ..
            }) => "query_timeout",
            TextToSqlError::Schema(_)
            | TextToSqlError::Generation(_)
            | TextToSqlError::Execution(_) => "query_failed",
        }
    }
}
