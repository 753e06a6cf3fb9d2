use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use invoice_copilot::application::ports::{
    SqlExecutor, SqlExecutorError, TableSchema, TabularResult,
};
use invoice_copilot::application::services::{
    ScopePolicy, TextToSqlError, TextToSqlService, TextToSqlSettings,
};
use invoice_copilot::domain::UserId;

use crate::helpers::{MockLlmClient, RecordingSqlExecutor, test_retry};

/// Executor whose result set repeats a column name.
struct RepeatedColumnExecutor;

#[async_trait]
impl SqlExecutor for RepeatedColumnExecutor {
    async fn describe(&self, _tables: &[String]) -> Result<Vec<TableSchema>, SqlExecutorError> {
        Ok(Vec::new())
    }

    async fn execute_read(
        &self,
        _sql: &str,
        _row_cap: usize,
        _timeout: Duration,
    ) -> Result<TabularResult, SqlExecutorError> {
        Err(SqlExecutorError::DuplicateColumn("id".to_string()))
    }
}

fn service(llm: MockLlmClient, executor: Arc<dyn SqlExecutor>) -> TextToSqlService {
    TextToSqlService::new(
        Arc::new(llm),
        executor,
        ScopePolicy::invoice_schema(),
        TextToSqlSettings::default(),
        test_retry(),
    )
}

#[tokio::test]
async fn given_fenced_sql_when_querying_then_inner_statement_is_generated() {
    let executor = Arc::new(RecordingSqlExecutor::new());
    let llm = MockLlmClient::new()
        .with_completion("Here is the query:\n```sql\nSELECT COUNT(*) FROM invoices\n```\nHope it helps");

    let answer = service(llm, executor.clone())
        .query("how many invoices?", UserId::new())
        .await
        .unwrap();

    assert_eq!(answer.generated_sql, "SELECT COUNT(*) FROM invoices");
    assert_eq!(executor.executed(), vec![answer.executed_sql.clone()]);
}

#[tokio::test]
async fn given_bare_sql_with_label_when_querying_then_label_is_trimmed() {
    let executor = Arc::new(RecordingSqlExecutor::new());
    let llm = MockLlmClient::new().with_completion("  SQL: SELECT SUM(total) FROM invoices  \n");

    let answer = service(llm, executor)
        .query("what did I spend?", UserId::new())
        .await
        .unwrap();

    assert_eq!(answer.generated_sql, "SELECT SUM(total) FROM invoices");
}

#[tokio::test]
async fn given_scoped_query_when_executing_then_user_filter_is_applied() {
    let executor = Arc::new(RecordingSqlExecutor::new());
    let user_id = UserId::new();
    let llm = MockLlmClient::new().with_completion("SELECT SUM(total) FROM invoices");

    service(llm, executor.clone())
        .query("what did I spend?", user_id)
        .await
        .unwrap();

    let executed = executor.executed();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].contains(&user_id.to_string()));
}

#[tokio::test]
async fn given_empty_reply_when_querying_then_nothing_is_executed() {
    let executor = Arc::new(RecordingSqlExecutor::new());
    let llm = MockLlmClient::new().with_completion("```sql\n```");

    let result = service(llm, executor.clone())
        .query("what did I spend?", UserId::new())
        .await;

    assert!(matches!(result, Err(TextToSqlError::EmptyGeneration)));
    assert!(executor.executed().is_empty());
}

#[tokio::test]
async fn given_write_statement_when_querying_then_rejected_as_validation() {
    let executor = Arc::new(RecordingSqlExecutor::new());
    let llm = MockLlmClient::new().with_completion("DELETE FROM invoices");

    let error = service(llm, executor.clone())
        .query("clear my invoices", UserId::new())
        .await
        .unwrap_err();

    assert_eq!(error.code(), "query_validation");
    assert!(executor.executed().is_empty());
}

#[tokio::test]
async fn given_repeated_result_columns_when_querying_then_reported_as_validation() {
    let llm = MockLlmClient::new().with_completion("SELECT id FROM invoices");

    let error = service(llm, Arc::new(RepeatedColumnExecutor))
        .query("list invoice ids", UserId::new())
        .await
        .unwrap_err();

    assert_eq!(error.code(), "query_validation");
}
