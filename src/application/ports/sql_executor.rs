use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::Transient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub truncated: bool,
}

/// Read-only SQL path with row and time caps.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn describe(&self, tables: &[String]) -> Result<Vec<TableSchema>, SqlExecutorError>;

    async fn execute_read(
        &self,
        sql: &str,
        row_cap: usize,
        timeout: Duration,
    ) -> Result<TabularResult, SqlExecutorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SqlExecutorError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("result column '{0}' appears more than once; alias each output column")]
    DuplicateColumn(String),
}

impl Transient for SqlExecutorError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            SqlExecutorError::ConnectionFailed(_) | SqlExecutorError::Timeout(_)
        )
    }
}
