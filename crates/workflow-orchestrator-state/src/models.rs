// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data models for run and checkpoint persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A run's terminal or in-flight status, as recorded by the state store.
///
/// Mirrors `crate::context::RunStatus` in the core crate, but this crate
/// does not depend on core — the two enums are kept in lockstep by the
/// embedder's persistence wiring, not by a shared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid run status: {s}")),
        }
    }
}

/// A durable record of one workflow run, as persisted between dispatcher
/// checkpoints and read back by the CLI's `history`/`replay` commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: Uuid,
    pub workflow_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// The most recently checkpointed variable snapshot.
    pub variables: Value,
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn new(run_id: Uuid, workflow_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            workflow_name: workflow_name.into(),
            status: RunStatus::Running,
            started_at: now,
            updated_at: now,
            finished_at: None,
            variables: Value::Null,
            error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, RunStatus::Running)
    }
}

/// A single checkpoint: the run's full variable snapshot as of the
/// completion of one step. Replay resumes from the most recent row for a
/// given run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: String,
    pub created_at: DateTime<Utc>,
    pub variables: Value,
}

impl CheckpointRecord {
    pub fn new(run_id: Uuid, step_id: impl Into<String>, variables: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            step_id: step_id.into(),
            created_at: Utc::now(),
            variables,
        }
    }
}

/// Aggregate counts returned by `getStats`, grouped by run status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_status_round_trips_through_its_string_form() {
        assert_eq!(RunStatus::Failed.to_string(), "failed");
        assert_eq!("completed".parse::<RunStatus>().unwrap(), RunStatus::Completed);
        assert!("bogus".parse::<RunStatus>().is_err());
    }

    #[test]
    fn new_execution_record_starts_running_and_active() {
        let record = ExecutionRecord::new(Uuid::new_v4(), "greet");
        assert_eq!(record.status, RunStatus::Running);
        assert!(record.is_active());
        assert!(record.finished_at.is_none());
    }

    #[test]
    fn checkpoint_record_carries_its_snapshot() {
        let run_id = Uuid::new_v4();
        let checkpoint = CheckpointRecord::new(run_id, "step-1", json!({"x": 1}));
        assert_eq!(checkpoint.run_id, run_id);
        assert_eq!(checkpoint.variables, json!({"x": 1}));
    }
}
