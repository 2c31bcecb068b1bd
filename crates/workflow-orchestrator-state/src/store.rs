// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The [`StateStore`] contract: everything the CLI's `run`/`replay`/
//! `history` commands and the core crate's `CheckpointSink` need from a
//! durable backing store.

use crate::models::{CheckpointRecord, ExecutionRecord, ExecutionStats, RunStatus};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("no run found matching '{0}'")]
    NotFound(String),

    #[error("run id prefix '{0}' is ambiguous")]
    AmbiguousPrefix(String),
}

/// Durable storage for run records and their checkpoints.
///
/// Implementations must be safe to share behind an `Arc` across the
/// concurrent runs an [`crate::sqlite::SqliteStateStore`] (or any other
/// backend) is asked to persist.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Inserts a new run record in `Running` status.
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<()>;

    /// Updates a run's status, variables, error, and `updated_at`/
    /// `finished_at` timestamps. Called once at the end of a run.
    async fn update_execution(
        &self,
        run_id: Uuid,
        status: RunStatus,
        variables: Value,
        error: Option<String>,
    ) -> Result<()>;

    /// Fetches one run by its full id.
    async fn get_execution(&self, run_id: Uuid) -> Result<ExecutionRecord>;

    /// Lists runs most-recent-first, optionally filtered to one status.
    async fn list_executions(&self, status: Option<RunStatus>) -> Result<Vec<ExecutionRecord>>;

    /// Appends a checkpoint row. Called by `CheckpointSink::save_checkpoint`
    /// after every successfully completed step.
    async fn save_checkpoint(&self, checkpoint: &CheckpointRecord) -> Result<()>;

    /// Returns every checkpoint for a run, oldest first.
    async fn get_checkpoints(&self, run_id: Uuid) -> Result<Vec<CheckpointRecord>>;

    /// Returns the most recent checkpoint for a run, if any — the replay
    /// entry point.
    async fn latest_checkpoint(&self, run_id: Uuid) -> Result<Option<CheckpointRecord>>;

    /// Aggregate run counts by status, for CLI summary output.
    async fn get_stats(&self) -> Result<ExecutionStats>;

    /// Resolves a run id or unambiguous id prefix (as `git` does for
    /// commit hashes) to a full run id, so the CLI can accept `replay
    /// a1b2c3` instead of the full UUID.
    async fn resolve_prefix(&self, prefix: &str) -> Result<Uuid>;

    /// Flushes and releases the underlying connection pool. Implementations
    /// that hold no resources worth releasing may no-op.
    async fn close(&self);
}
