// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `wait`: suspend the run until a duration elapses, or until an
//! external party resumes it via webhook or a completed form.
//!
//! A `duration` wait under [`LONG_WAIT_THRESHOLD`] sleeps in-process.
//! Longer durations, and every `webhook`/`form` wait, never block the
//! dispatching task: they persist a checkpoint recording how the run is
//! suspended and return immediately with a `{waiting: true, mode, ...}`
//! marker value. [`ExecutionManager`](crate::manager::ExecutionManager)
//! reads that marker to park the run and `resumeExecution` reconstructs
//! it later rather than this function blocking for the life of the wait.

use crate::context::ExecutionContext;
use crate::dispatcher::{DispatchContext, ExecResult};
use crate::error::Result;
use crate::workflow::{Step, WaitStep};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Durations at or below this sleep in-process; longer ones suspend the
/// run and return a `resumeAt` marker instead of holding the task open.
const LONG_WAIT_THRESHOLD: Duration = Duration::from_millis(300_000);

/// Tracks which `(run_id, step_id)` pairs are currently suspended on a
/// `wait(mode = webhook|form)`, and the `resumeToken` each was issued.
/// Purely a membership/lookup table — the actual suspend/resume
/// bookkeeping (where to resume execution from) lives on
/// [`crate::manager::ExecutionManager`]'s run entry.
#[derive(Clone, Default)]
pub struct WaitRegistry {
    pending: Arc<DashMap<(Uuid, String), String>>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, run_id: Uuid, step_id: &str, token: &str) {
        self.pending.insert((run_id, step_id.to_string()), token.to_string());
    }

    pub fn is_pending(&self, run_id: Uuid, step_id: &str) -> bool {
        self.pending.contains_key(&(run_id, step_id.to_string()))
    }

    /// Removes and returns the token a pending wait was issued, if any.
    pub fn take(&self, run_id: Uuid, step_id: &str) -> Option<String> {
        self.pending.remove(&(run_id, step_id.to_string())).map(|(_, token)| token)
    }
}

pub async fn execute(step: &WaitStep, outer: &Step, context: &ExecutionContext, dctx: &DispatchContext) -> Result<ExecResult> {
    match step {
        WaitStep::Duration { duration } => {
            let rendered = crate::resolver::resolve_template_string(duration, context)?;
            let parsed = parse_duration(&rendered)?;

            if parsed > LONG_WAIT_THRESHOLD {
                let delta = chrono::Duration::from_std(parsed).unwrap_or_default();
                let resume_at = (Utc::now() + delta).to_rfc3339();
                persist_wait_checkpoint(dctx, context, &outer.id, "duration", None).await;
                return Ok(ExecResult::Completed(json!({
                    "waiting": true,
                    "mode": "duration",
                    "resumeAt": resume_at,
                    "durationMs": parsed.as_millis() as u64,
                })));
            }

            tokio::select! {
                _ = tokio::time::sleep(parsed) => Ok(ExecResult::Completed(Value::Null)),
                _ = context.cancellation().cancelled() => Err(crate::error::OrchestratorError::Cancelled),
            }
        }
        WaitStep::Webhook { path } => {
            let token = Uuid::new_v4().to_string();
            dctx.waits.register(context.run_id, &outer.id, &token);
            persist_wait_checkpoint(dctx, context, &outer.id, "webhook", Some(&token)).await;
            Ok(ExecResult::Completed(json!({
                "waiting": true,
                "mode": "webhook",
                "resumeToken": token,
                "path": path,
            })))
        }
        WaitStep::Form { path, .. } => {
            let token = Uuid::new_v4().to_string();
            dctx.waits.register(context.run_id, &outer.id, &token);
            persist_wait_checkpoint(dctx, context, &outer.id, "form", Some(&token)).await;
            Ok(ExecResult::Completed(json!({
                "waiting": true,
                "mode": "form",
                "resumeToken": token,
                "path": path,
            })))
        }
    }
}

/// Explicitly records that `step_id` is suspended, alongside the run's
/// current variables — distinct from the dispatcher's own per-step
/// checkpoint, since a suspended step never reaches
/// [`crate::dispatcher::dispatch`]'s normal `finish` tail until it resumes.
async fn persist_wait_checkpoint(dctx: &DispatchContext, context: &ExecutionContext, step_id: &str, mode: &str, token: Option<&str>) {
    let Some(sink) = &dctx.checkpoint else { return };
    let mut snapshot = context.variables_flat();
    snapshot.insert(format!("__wait:{step_id}"), json!({"mode": mode, "resumeToken": token}));
    let value = serde_json::to_value(snapshot).unwrap_or(Value::Null);
    if let Err(err) = sink.save_checkpoint(context.run_id, step_id, value).await {
        tracing::warn!(step_id, error = %err, "wait checkpoint persistence failed");
    }
}

/// Parses `"30s"`, `"5m"`, `"1h"`, or a bare millisecond count.
fn parse_duration(text: &str) -> Result<Duration> {
    let trimmed = text.trim();
    let invalid = || crate::error::OrchestratorError::WaitInvariant(format!("invalid duration '{}'", trimmed));

    if let Some(num) = trimmed.strip_suffix("ms") {
        return num.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid());
    }
    if let Some(num) = trimmed.strip_suffix('s') {
        return num.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| invalid());
    }
    if let Some(num) = trimmed.strip_suffix('m') {
        return num.trim().parse::<u64>().map(|n| Duration::from_secs(n * 60)).map_err(|_| invalid());
    }
    if let Some(num) = trimmed.strip_suffix('h') {
        return num.trim().parse::<u64>().map(|n| Duration::from_secs(n * 3600)).map_err(|_| invalid());
    }
    trimmed.parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
}
