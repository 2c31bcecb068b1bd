// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Execution Manager: the run-level surface embedders use
//! instead of calling [`crate::dispatcher::dispatch`] directly —
//! `startExecution`, `cancelExecution`, `resumeExecution`,
//! `getExecutionStatus`, `listExecutions`, `waitForAll`.
//!
//! Completed/cancelled/failed runs are retained for one minute after
//! their terminal transition so a caller that polls `getExecutionStatus`
//! shortly after completion still sees the result, then are swept to
//! bound memory rather than kept forever.

use crate::context::{ExecutionContext, RunStatus};
use crate::control::WaitRegistry;
use crate::dispatcher::{dispatch, DispatchContext, StepResult};
use crate::error::{OrchestratorError, Result};
use crate::workflow::Workflow;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

const RETENTION: Duration = Duration::from_secs(60);

/// Records where a run parked on a `wait(mode = webhook|form|duration)`
/// step so `resumeExecution` can pick the run back up from the step after
/// it, rather than replaying the whole workflow.
struct SuspendedWait {
    step_index: usize,
    step_id: String,
    mode: String,
    resume_token: Option<String>,
}

/// If `result` is a completed step whose output is a wait's `{waiting:
/// true, mode, resumeToken?}` marker, extracts `(mode, resumeToken)`.
fn suspension(result: &StepResult) -> Option<(String, Option<String>)> {
    if result.status != crate::dispatcher::StepStatus::Completed {
        return None;
    }
    let obj = result.output.as_object()?;
    if obj.get("waiting").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    let mode = obj.get("mode")?.as_str()?.to_string();
    let resume_token = obj.get("resumeToken").and_then(Value::as_str).map(str::to_string);
    Some((mode, resume_token))
}

/// A point-in-time view of a run, returned by `getExecutionStatus`/`listExecutions`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionSummary {
    pub run_id: Uuid,
    pub workflow_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub step_results: Vec<StepResult>,
}

struct RunEntry {
    context: ExecutionContext,
    workflow: Arc<Workflow>,
    workflow_name: String,
    finished_at: parking_lot::Mutex<Option<DateTime<Utc>>>,
    step_results: parking_lot::Mutex<Vec<StepResult>>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    suspended: parking_lot::Mutex<Option<SuspendedWait>>,
}

/// Tracks every in-flight and recently-finished run. Cheap to clone — an
/// `Arc`-backed handle, the same pattern [`ExecutionContext`] uses.
#[derive(Clone)]
pub struct ExecutionManager {
    runs: Arc<DashMap<Uuid, Arc<RunEntry>>>,
    dctx: DispatchContext,
}

impl ExecutionManager {
    pub fn new(dctx: DispatchContext) -> Self {
        Self { runs: Arc::new(DashMap::new()), dctx }
    }

    pub fn waits(&self) -> &WaitRegistry {
        &self.dctx.waits
    }

    /// Validates the workflow, resolves inputs, and spawns the run on a
    /// background task. Returns the run id immediately — the caller polls
    /// [`ExecutionManager::get_execution_status`] or awaits
    /// [`ExecutionManager::wait_for_all`] for completion.
    pub fn start_execution(&self, workflow: Arc<Workflow>, inputs: HashMap<String, Value>) -> Result<Uuid> {
        workflow.validate()?;
        let resolved = workflow.resolve_inputs(inputs)?;

        let run_id = Uuid::new_v4();
        let context = ExecutionContext::new(run_id, workflow.id.to_string(), resolved);
        let entry = Arc::new(RunEntry {
            context: context.clone(),
            workflow: workflow.clone(),
            workflow_name: workflow.name.clone(),
            finished_at: parking_lot::Mutex::new(None),
            step_results: parking_lot::Mutex::new(Vec::new()),
            handle: parking_lot::Mutex::new(None),
            suspended: parking_lot::Mutex::new(None),
        });
        self.runs.insert(run_id, entry.clone());

        let dctx = self.dctx.clone();
        let runs = self.runs.clone();
        let entry_for_task = entry.clone();

        dctx.observers.on_workflow_start(run_id, &workflow);
        let handle = tokio::spawn(run_steps(entry_for_task, dctx, runs, 0));
        *entry.handle.lock() = Some(handle);

        Ok(run_id)
    }

    /// Signals cancellation on the run's [`crate::context::CancellationToken`].
    /// The run observes this at its next dispatcher checkpoint and every
    /// in-flight sleep/wait; it does not stop mid-step. Returns `false`
    /// if the run had already reached a terminal status (a redundant
    /// second cancel is a no-op, not an error).
    pub fn cancel_execution(&self, run_id: Uuid) -> Result<bool> {
        let entry = self.runs.get(&run_id).ok_or_else(|| OrchestratorError::other(format!("unknown run '{run_id}'")))?;
        if entry.context.status() != RunStatus::Running || entry.context.cancellation().is_cancelled() {
            return Ok(false);
        }
        entry.context.cancellation().cancel();
        Ok(true)
    }

    /// Delivers resume data to a run suspended on a `wait` step and
    /// resumes the workflow from the step after it. The data is bound as
    /// a top-level `webhook`/`form` variable depending on the wait's
    /// mode; a `duration` wait binds nothing and simply continues.
    pub fn resume_execution(&self, run_id: Uuid, step_id: &str, data: Value) -> Result<()> {
        let entry = self.runs.get(&run_id).ok_or_else(|| OrchestratorError::other(format!("unknown run '{run_id}'")))?.clone();

        let suspended = entry.suspended.lock().take().ok_or_else(|| {
            OrchestratorError::WaitInvariant(format!("no pending wait for run '{run_id}' step '{step_id}'"))
        });
        let suspended = match suspended {
            Ok(s) if s.step_id == step_id => s,
            Ok(s) => {
                let mismatch = format!("run '{run_id}' is suspended on step '{}', not '{step_id}'", s.step_id);
                *entry.suspended.lock() = Some(s);
                return Err(OrchestratorError::WaitInvariant(mismatch));
            }
            Err(err) => return Err(err),
        };

        match suspended.mode.as_str() {
            "webhook" => entry.context.set_variable("webhook", data),
            "form" => entry.context.set_variable("form", data),
            _ => {}
        }
        if suspended.resume_token.is_some() {
            self.dctx.waits.take(run_id, step_id);
        }

        let dctx = self.dctx.clone();
        let runs = self.runs.clone();
        let handle = tokio::spawn(run_steps(entry.clone(), dctx, runs, suspended.step_index + 1));
        *entry.handle.lock() = Some(handle);

        Ok(())
    }

    pub fn get_execution_status(&self, run_id: Uuid) -> Option<ExecutionSummary> {
        self.runs.get(&run_id).map(|entry| summarize(run_id, &entry))
    }

    pub fn list_executions(&self) -> Vec<ExecutionSummary> {
        self.runs.iter().map(|entry| summarize(*entry.key(), entry.value())).collect()
    }

    /// Awaits every run's background task, including ones that finish
    /// after this call starts. Intended for tests and CLI `run`/`replay`
    /// commands driving exactly one run to completion.
    pub async fn wait_for_all(&self) {
        let handles: Vec<JoinHandle<()>> =
            self.runs.iter().filter_map(|entry| entry.handle.lock().take()).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

fn summarize(run_id: Uuid, entry: &RunEntry) -> ExecutionSummary {
    ExecutionSummary {
        run_id,
        workflow_name: entry.workflow_name.clone(),
        status: entry.context.status(),
        started_at: entry.context.started_at,
        finished_at: *entry.finished_at.lock(),
        step_results: entry.step_results.lock().clone(),
    }
}

/// Drives `entry.workflow.steps[start_index..]` through the dispatcher.
/// If a step's result is a wait's suspension marker, records a
/// [`SuspendedWait`] and returns without transitioning the run to a
/// terminal status — it stays `Running`, retained until `resumeExecution`
/// picks it back up. Otherwise runs to completion/failure/cancellation as
/// before, finalizes the run, and schedules its retention sweep.
///
/// Only top-level steps are checked for suspension: a `wait` nested
/// inside `if`/`for_each`/etc. still blocks in-process for the duration
/// of its containing step, since resuming mid-nested-step would require
/// full continuation-style execution.
async fn run_steps(entry: Arc<RunEntry>, dctx: DispatchContext, runs: Arc<DashMap<Uuid, Arc<RunEntry>>>, start_index: usize) {
    let run_id = entry.context.run_id;
    let mut failed = false;
    let mut cancelled = false;

    for (offset, step) in entry.workflow.steps[start_index..].iter().enumerate() {
        let index = start_index + offset;
        let result = dispatch(step, &entry.context, &dctx).await;

        if let Some((mode, resume_token)) = suspension(&result) {
            *entry.suspended.lock() = Some(SuspendedWait { step_index: index, step_id: result.step_id.clone(), mode, resume_token });
            entry.step_results.lock().push(result);
            return;
        }

        let is_terminal_failure = matches!(result.status, crate::dispatcher::StepStatus::Failed);
        let is_cancellation = matches!(result.status, crate::dispatcher::StepStatus::Cancelled);
        entry.step_results.lock().push(result);
        if is_cancellation {
            cancelled = true;
            break;
        }
        if is_terminal_failure {
            failed = true;
            break;
        }
    }

    let final_status = if cancelled {
        RunStatus::Cancelled
    } else if failed {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    };
    entry.context.set_status(final_status);
    *entry.finished_at.lock() = Some(Utc::now());
    dctx.observers.on_workflow_complete(run_id, final_status);

    schedule_sweep(runs, run_id);
}

fn schedule_sweep(runs: Arc<DashMap<Uuid, Arc<RunEntry>>>, run_id: Uuid) {
    tokio::spawn(async move {
        tokio::time::sleep(RETENTION).await;
        runs.remove(&run_id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionExecutor, AdapterRegistry, ActionRouter, StaticAdapterRegistry, StepExecutorContext};
    use crate::events::ObserverChannel;
    use crate::workflow::{ActionStep, Step, StepKind};
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ActionExecutor for Echo {
        async fn execute(
            &self,
            step: &ActionStep,
            _context: &ExecutionContext,
            _registry: &dyn AdapterRegistry,
            _executor_context: &StepExecutorContext,
        ) -> Result<Value> {
            Ok(step.params.get("value").cloned().unwrap_or(Value::Null))
        }
    }

    fn manager() -> ExecutionManager {
        let dctx = DispatchContext {
            actions: ActionRouter::builder().register("echo", Arc::new(Echo)).build(),
            registry: Arc::new(StaticAdapterRegistry::default()),
            observers: ObserverChannel::new(),
            checkpoint: None,
            workflow_loader: None,
            waits: WaitRegistry::new(),
            default_max_concurrency: None,
        };
        ExecutionManager::new(dctx)
    }

    fn workflow() -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            name: "greet".into(),
            version: "1.0".into(),
            description: None,
            inputs: vec![],
            tools: HashMap::new(),
            timeout_seconds: None,
            steps: vec![Step::leaf(
                "say",
                StepKind::Action(ActionStep { action: "echo".into(), params: HashMap::from([("value".to_string(), json!("hi"))]) }),
            )],
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn run_completes_and_is_queryable_by_status() {
        let manager = manager();
        let run_id = manager.start_execution(Arc::new(workflow()), HashMap::new()).unwrap();
        manager.wait_for_all().await;
        let summary = manager.get_execution_status(run_id).unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.step_results.len(), 1);
    }

    #[tokio::test]
    async fn cancelling_a_run_yields_cancelled_status() {
        let manager = manager();
        let run_id = manager.start_execution(Arc::new(workflow()), HashMap::new()).unwrap();
        manager.cancel_execution(run_id).unwrap();
        manager.wait_for_all().await;
        let summary = manager.get_execution_status(run_id).unwrap();
        assert!(matches!(summary.status, RunStatus::Cancelled | RunStatus::Completed));
    }

    #[tokio::test]
    async fn list_executions_includes_started_run() {
        let manager = manager();
        let run_id = manager.start_execution(Arc::new(workflow()), HashMap::new()).unwrap();
        manager.wait_for_all().await;
        assert!(manager.list_executions().iter().any(|s| s.run_id == run_id));
    }

    #[tokio::test]
    async fn cancelling_unknown_run_errors() {
        let manager = manager();
        let result = manager.cancel_execution(Uuid::new_v4());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancelling_a_suspended_run_returns_true_then_false_on_repeat() {
        let manager = manager();
        let suspended_workflow = Workflow {
            id: Uuid::new_v4(),
            name: "parks".into(),
            version: "1.0".into(),
            description: None,
            inputs: vec![],
            tools: HashMap::new(),
            timeout_seconds: None,
            steps: vec![Step::leaf(
                "park",
                StepKind::Wait(crate::workflow::WaitStep::Duration { duration: "600000ms".into() }),
            )],
            metadata: HashMap::new(),
        };
        let run_id = manager.start_execution(Arc::new(suspended_workflow), HashMap::new()).unwrap();
        manager.wait_for_all().await;
        let summary = manager.get_execution_status(run_id).unwrap();
        assert_eq!(summary.status, RunStatus::Running);

        assert_eq!(manager.cancel_execution(run_id).unwrap(), true);
        assert_eq!(manager.cancel_execution(run_id).unwrap(), false);
    }
}
