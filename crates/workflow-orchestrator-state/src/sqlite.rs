// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A SQLite-backed [`StateStore`], addressed by file path or `:memory:`.
//!
//! Queries are built with the runtime `sqlx::query`/`query_as` API rather
//! than the `query!` macros — those need a live database reachable at
//! build time, which this crate cannot assume.

use crate::models::{CheckpointRecord, ExecutionRecord, ExecutionStats, RunStatus};
use crate::store::{Result, StateStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// A connection pool over a single SQLite database, schema-migrated on
/// construction.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Opens (creating if necessary) the database at `path`, or an
    /// in-memory database when `path` is `:memory:`. Runs the embedded
    /// schema migration before returning.
    pub async fn new(path: &str) -> Result<Self> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?.create_if_missing(true)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(if path == ":memory:" { 1 } else { 5 })
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        debug!(path, "sqlite state store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                run_id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                finished_at TEXT,
                variables TEXT NOT NULL,
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES executions(run_id),
                step_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                variables TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS checkpoints_run_id_idx ON checkpoints(run_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionRecord> {
        let run_id: String = row.try_get("run_id")?;
        let status: String = row.try_get("status")?;
        let variables: String = row.try_get("variables")?;
        Ok(ExecutionRecord {
            run_id: Uuid::parse_str(&run_id).map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
            workflow_name: row.try_get("workflow_name")?,
            status: RunStatus::from_str(&status).map_err(StoreError::NotFound)?,
            started_at: row.try_get("started_at")?,
            updated_at: row.try_get("updated_at")?,
            finished_at: row.try_get("finished_at")?,
            variables: serde_json::from_str(&variables).unwrap_or(Value::Null),
            error: row.try_get("error")?,
        })
    }

    fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<CheckpointRecord> {
        let id: String = row.try_get("id")?;
        let run_id: String = row.try_get("run_id")?;
        let variables: String = row.try_get("variables")?;
        Ok(CheckpointRecord {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
            run_id: Uuid::parse_str(&run_id).map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
            step_id: row.try_get("step_id")?,
            created_at: row.try_get("created_at")?,
            variables: serde_json::from_str(&variables).unwrap_or(Value::Null),
        })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<()> {
        debug!(run_id = %record.run_id, workflow = %record.workflow_name, "creating execution record");
        sqlx::query(
            "INSERT INTO executions (run_id, workflow_name, status, started_at, updated_at, finished_at, variables, error) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.run_id.to_string())
        .bind(&record.workflow_name)
        .bind(record.status.to_string())
        .bind(record.started_at)
        .bind(record.updated_at)
        .bind(record.finished_at)
        .bind(record.variables.to_string())
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_execution(
        &self,
        run_id: Uuid,
        status: RunStatus,
        variables: Value,
        error: Option<String>,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        let finished_at = matches!(status, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
            .then_some(now);
        let result = sqlx::query(
            "UPDATE executions SET status = ?, updated_at = ?, finished_at = COALESCE(?, finished_at), \
             variables = ?, error = ? WHERE run_id = ?",
        )
        .bind(status.to_string())
        .bind(now)
        .bind(finished_at)
        .bind(variables.to_string())
        .bind(&error)
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(run_id.to_string()));
        }
        Ok(())
    }

    async fn get_execution(&self, run_id: Uuid) -> Result<ExecutionRecord> {
        let row = sqlx::query("SELECT * FROM executions WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        Self::row_to_execution(&row)
    }

    async fn list_executions(&self, status: Option<RunStatus>) -> Result<Vec<ExecutionRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM executions WHERE status = ? ORDER BY started_at DESC")
                    .bind(status.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM executions ORDER BY started_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn save_checkpoint(&self, checkpoint: &CheckpointRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO checkpoints (id, run_id, step_id, created_at, variables) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.run_id.to_string())
        .bind(&checkpoint.step_id)
        .bind(checkpoint.created_at)
        .bind(checkpoint.variables.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_checkpoints(&self, run_id: Uuid) -> Result<Vec<CheckpointRecord>> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE run_id = ? ORDER BY created_at ASC")
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_checkpoint).collect()
    }

    async fn latest_checkpoint(&self, run_id: Uuid) -> Result<Option<CheckpointRecord>> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE run_id = ? ORDER BY created_at DESC LIMIT 1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn get_stats(&self) -> Result<ExecutionStats> {
        let executions = self.list_executions(None).await?;
        let mut stats = ExecutionStats { total: executions.len() as i64, ..Default::default() };
        for execution in &executions {
            match execution.status {
                RunStatus::Running => stats.running += 1,
                RunStatus::Completed => stats.completed += 1,
                RunStatus::Failed => stats.failed += 1,
                RunStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    async fn resolve_prefix(&self, prefix: &str) -> Result<Uuid> {
        if let Ok(exact) = Uuid::parse_str(prefix) {
            return Ok(exact);
        }
        let rows = sqlx::query("SELECT run_id FROM executions WHERE run_id LIKE ?")
            .bind(format!("{prefix}%"))
            .fetch_all(&self.pool)
            .await?;
        let mut matches: Vec<Uuid> = Vec::new();
        for row in &rows {
            let run_id: String = row.try_get("run_id")?;
            if let Ok(parsed) = Uuid::parse_str(&run_id) {
                matches.push(parsed);
            }
        }
        match matches.len() {
            0 => Err(StoreError::NotFound(prefix.to_string())),
            1 => Ok(matches[0]),
            _ => Err(StoreError::AmbiguousPrefix(prefix.to_string())),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqliteStateStore {
        SqliteStateStore::new(":memory:").await.expect("in-memory store")
    }

    #[tokio::test]
    async fn create_then_get_round_trips_a_record() {
        let store = store().await;
        let record = ExecutionRecord::new(Uuid::new_v4(), "greet");
        store.create_execution(&record).await.unwrap();

        let fetched = store.get_execution(record.run_id).await.unwrap();
        assert_eq!(fetched.workflow_name, "greet");
        assert_eq!(fetched.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn update_execution_changes_status_and_sets_finished_at() {
        let store = store().await;
        let record = ExecutionRecord::new(Uuid::new_v4(), "greet");
        store.create_execution(&record).await.unwrap();

        store
            .update_execution(record.run_id, RunStatus::Completed, json!({"result": "ok"}), None)
            .await
            .unwrap();

        let fetched = store.get_execution(record.run_id).await.unwrap();
        assert_eq!(fetched.status, RunStatus::Completed);
        assert!(fetched.finished_at.is_some());
        assert_eq!(fetched.variables, json!({"result": "ok"}));
    }

    #[tokio::test]
    async fn update_unknown_execution_errors() {
        let store = store().await;
        let result = store.update_execution(Uuid::new_v4(), RunStatus::Completed, Value::Null, None).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_executions_filters_by_status() {
        let store = store().await;
        let running = ExecutionRecord::new(Uuid::new_v4(), "a");
        let mut done = ExecutionRecord::new(Uuid::new_v4(), "b");
        done.status = RunStatus::Completed;
        store.create_execution(&running).await.unwrap();
        store.create_execution(&done).await.unwrap();

        let completed = store.list_executions(Some(RunStatus::Completed)).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].workflow_name, "b");
    }

    #[tokio::test]
    async fn checkpoints_are_returned_oldest_first_and_latest_is_last() {
        let store = store().await;
        let record = ExecutionRecord::new(Uuid::new_v4(), "greet");
        store.create_execution(&record).await.unwrap();

        store.save_checkpoint(&CheckpointRecord::new(record.run_id, "step1", json!({"n": 1}))).await.unwrap();
        store.save_checkpoint(&CheckpointRecord::new(record.run_id, "step2", json!({"n": 2}))).await.unwrap();

        let all = store.get_checkpoints(record.run_id).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].step_id, "step1");

        let latest = store.latest_checkpoint(record.run_id).await.unwrap().unwrap();
        assert_eq!(latest.step_id, "step2");
    }

    #[tokio::test]
    async fn resolve_prefix_finds_unique_match_and_rejects_ambiguity() {
        let store = store().await;
        let record = ExecutionRecord::new(Uuid::new_v4(), "greet");
        store.create_execution(&record).await.unwrap();

        let prefix = &record.run_id.to_string()[..8];
        let resolved = store.resolve_prefix(prefix).await.unwrap();
        assert_eq!(resolved, record.run_id);

        let missing = store.resolve_prefix("00000000").await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn get_stats_counts_by_status() {
        let store = store().await;
        let running = ExecutionRecord::new(Uuid::new_v4(), "a");
        let mut failed = ExecutionRecord::new(Uuid::new_v4(), "b");
        failed.status = RunStatus::Failed;
        store.create_execution(&running).await.unwrap();
        store.create_execution(&failed).await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.failed, 1);
    }
}
