use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Column, Executor, PgPool, Row};
use tracing::instrument;

use crate::application::ports::{
    ColumnSchema, SqlExecutor, SqlExecutorError, TableSchema, TabularResult,
};

/// Postgres `query_canceled`, raised when `statement_timeout` fires.
const QUERY_CANCELED: &str = "57014";

/// Runs already-validated read queries inside a read-only transaction with a
/// server-side statement timeout, a client-side timeout and a row cap.
pub struct PgSqlExecutor {
    pool: PgPool,
}

impl PgSqlExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run_read(
        &self,
        sql: &str,
        row_cap: usize,
        timeout: Duration,
    ) -> Result<TabularResult, SqlExecutorError> {
        let mut tx = self.pool.begin().await.map_err(connection_error)?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| execution_error(e, timeout))?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            timeout.as_millis().max(1)
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| execution_error(e, timeout))?;

        let described = (&mut *tx)
            .describe(sql)
            .await
            .map_err(|e| execution_error(e, timeout))?;
        let columns: Vec<String> = described
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        // row_to_json keys rows by column name, so repeated names would collapse.
        if let Some(duplicate) = first_duplicate(&columns) {
            return Err(SqlExecutorError::DuplicateColumn(duplicate.to_string()));
        }

        let wrapped = format!(
            "SELECT row_to_json(scoped_result) AS row FROM ({}) AS scoped_result LIMIT {}",
            sql,
            row_cap.saturating_add(1)
        );
        let records = sqlx::query(&wrapped)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| execution_error(e, timeout))?;

        let mut objects = Vec::with_capacity(records.len());
        for record in &records {
            let value: serde_json::Value = record
                .try_get("row")
                .map_err(|e| SqlExecutorError::ExecutionFailed(e.to_string()))?;
            if let serde_json::Value::Object(map) = value {
                objects.push(map);
            }
        }

        let truncated = objects.len() > row_cap;
        objects.truncate(row_cap);
        let rows = objects
            .into_iter()
            .map(|mut object| {
                columns
                    .iter()
                    .map(|c| object.remove(c).unwrap_or(serde_json::Value::Null))
                    .collect()
            })
            .collect();

        tx.rollback().await.map_err(connection_error)?;

        Ok(TabularResult {
            columns,
            rows,
            truncated,
        })
    }
}

fn first_duplicate(columns: &[String]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(columns.len());
    columns
        .iter()
        .find(|name| !seen.insert(name.as_str()))
        .map(String::as_str)
}

fn connection_error(e: sqlx::Error) -> SqlExecutorError {
    SqlExecutorError::ConnectionFailed(e.to_string())
}

fn execution_error(e: sqlx::Error, timeout: Duration) -> SqlExecutorError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(QUERY_CANCELED) => {
            SqlExecutorError::Timeout(timeout)
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            SqlExecutorError::ConnectionFailed(e.to_string())
        }
        _ => SqlExecutorError::ExecutionFailed(e.to_string()),
    }
}

#[async_trait]
impl SqlExecutor for PgSqlExecutor {
    #[instrument(skip(self, tables), fields(tables = tables.len()))]
    async fn describe(&self, tables: &[String]) -> Result<Vec<TableSchema>, SqlExecutorError> {
        let rows = sqlx::query(
            r#"
            SELECT table_name::text AS table_name, column_name::text AS column_name,
                   data_type::text AS data_type
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = ANY($1)
            ORDER BY table_name, ordinal_position
            "#,
        )
        .bind(tables)
        .fetch_all(&self.pool)
        .await
        .map_err(connection_error)?;

        let mut schema: Vec<TableSchema> = Vec::new();
        for row in rows {
            let table: String = row
                .try_get("table_name")
                .map_err(|e| SqlExecutorError::ExecutionFailed(e.to_string()))?;
            let column = ColumnSchema {
                name: row
                    .try_get("column_name")
                    .map_err(|e| SqlExecutorError::ExecutionFailed(e.to_string()))?,
                data_type: row
                    .try_get("data_type")
                    .map_err(|e| SqlExecutorError::ExecutionFailed(e.to_string()))?,
            };
            match schema.last_mut() {
                Some(last) if last.name == table => last.columns.push(column),
                _ => schema.push(TableSchema {
                    name: table,
                    columns: vec![column],
                }),
            }
        }
        Ok(schema)
    }

    #[instrument(skip(self, sql), fields(row_cap = row_cap, timeout_ms = timeout.as_millis() as u64))]
    async fn execute_read(
        &self,
        sql: &str,
        row_cap: usize,
        timeout: Duration,
    ) -> Result<TabularResult, SqlExecutorError> {
        match tokio::time::timeout(timeout, self.run_read(sql, row_cap, timeout)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Read query timed out");
                Err(SqlExecutorError::Timeout(timeout))
            }
        }
    }
}
