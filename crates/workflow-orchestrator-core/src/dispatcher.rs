// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Step Dispatcher: `dispatch(step, context,
//! dispatch_ctx) -> StepResult`.
//!
//! One function, reentered recursively by every control-flow executor for
//! its child steps — there is exactly one place in the crate that runs a
//! step end to end. The six-step algorithm: evaluate guard conditions,
//! emit `onStepStart`, route to a leaf action or a control-flow executor,
//! apply the step's retry policy and timeout around that routing, bind the
//! declared output variable, then emit `onStepComplete`/`onStepError` and
//! persist a checkpoint.

use crate::action::{ActionRouter, AdapterRegistry, StepExecutorContext};
use crate::condition;
use crate::context::ExecutionContext;
use crate::control::WaitRegistry;
use crate::error::{OrchestratorError, Result};
use crate::events::ObserverChannel;
use crate::resolver;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::workflow::{ActionStep, Step, StepKind, Workflow, WorkflowCallStep};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of running one step. `output` is `Value::Null` for
/// skipped/cancelled steps and for completed steps with no declared
/// `output` binding — it is always the value that *would have been*
/// bound, independent of whether the workflow asked for it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub output: Value,
    pub error: Option<String>,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

/// What a control-flow executor actually resolved to, carried back through
/// [`run_kind`] so [`dispatch_inner`] can report `skipped` instead of
/// `completed` when, e.g., an `if`'s chosen branch is empty. Leaf actions
/// and workflow calls only ever produce `Completed`.
#[derive(Debug, Clone)]
pub(crate) enum ExecResult {
    Completed(Value),
    Skipped(Value),
}

impl ExecResult {
    pub(crate) fn into_parts(self) -> (StepStatus, Value) {
        match self {
            ExecResult::Completed(v) => (StepStatus::Completed, v),
            ExecResult::Skipped(v) => (StepStatus::Skipped, v),
        }
    }
}

/// Durable checkpoint sink consulted after every step completes. A no-op
/// implementation is fine for in-memory runs; `workflow-orchestrator-state`
/// provides the persisted one.
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn save_checkpoint(&self, run_id: Uuid, step_id: &str, variables: Value) -> Result<()>;
}

/// Resolves a `workflow`-kind step's `workflowPath` to a parsed, validated
/// [`Workflow`]. The dispatcher does not know how workflows are stored —
/// filesystem, registry, embedded bundle — only that this trait can fetch
/// one.
#[async_trait]
pub trait WorkflowLoader: Send + Sync {
    async fn load(&self, path: &str) -> Result<Workflow>;
}

/// Everything the dispatcher and every control-flow executor need that
/// isn't carried on [`ExecutionContext`]: where actions live, how adapters
/// are resolved, who hears about lifecycle events, and how checkpoints and
/// nested workflow loads happen.
#[derive(Clone)]
pub struct DispatchContext {
    pub actions: ActionRouter,
    pub registry: Arc<dyn AdapterRegistry>,
    pub observers: ObserverChannel,
    pub checkpoint: Option<Arc<dyn CheckpointSink>>,
    pub workflow_loader: Option<Arc<dyn WorkflowLoader>>,
    pub waits: WaitRegistry,
    /// Fallback bound for a `parallel` step that omits `maxConcurrent`.
    /// `None` leaves such steps unbounded, as before this field existed.
    pub default_max_concurrency: Option<usize>,
}

/// Runs one step to completion (or skip/cancellation) and returns its
/// result. Boxed because control-flow executors call back into this for
/// every child step, and `async fn` cannot recurse unboxed.
pub fn dispatch<'a>(
    step: &'a Step,
    context: &'a ExecutionContext,
    dctx: &'a DispatchContext,
) -> BoxFuture<'a, StepResult> {
    Box::pin(dispatch_inner(step, context, dctx))
}

async fn dispatch_inner(step: &Step, context: &ExecutionContext, dctx: &DispatchContext) -> StepResult {
    let started_at = Utc::now();

    if context.cancellation().is_cancelled() {
        return finish(step, context, dctx, started_at, StepStatus::Cancelled, Value::Null, Some("execution cancelled".into()), 0).await;
    }

    for condition_text in &step.conditions {
        match condition::evaluate_condition(condition_text, context) {
            Ok(true) => {}
            Ok(false) => {
                return finish(step, context, dctx, started_at, StepStatus::Skipped, Value::Null, None, 0).await;
            }
            Err(err) => {
                return finish(step, context, dctx, started_at, StepStatus::Failed, Value::Null, Some(err.to_string()), 0).await;
            }
        }
    }

    dctx.observers.on_step_start(context.run_id, step);

    let policy = step.retry.as_ref().map(RetryPolicy::from_config).unwrap_or_default();
    let retrier = RetryExecutor::new(policy);
    let timeout_duration = step.timeout_seconds.map(Duration::from_secs);

    let outcome = retrier
        .execute(context.cancellation(), || async {
            let attempt = run_kind(step, context, dctx);
            match timeout_duration {
                Some(d) => match tokio::time::timeout(d, attempt).await {
                    Ok(inner) => inner,
                    Err(_) => Err(OrchestratorError::Timeout { duration: d }),
                },
                None => attempt.await,
            }
        })
        .await;

    let (status, output, error) = match outcome.result {
        Ok(exec) => {
            let (status, value) = exec.into_parts();
            (status, value, None)
        }
        Err(err) if err.is_cancellation() => (StepStatus::Cancelled, Value::Null, Some(err.to_string())),
        Err(err) => (StepStatus::Failed, Value::Null, Some(err.to_string())),
    };

    finish(step, context, dctx, started_at, status, output, error, outcome.retry_count).await
}

/// Shared tail for every exit path out of [`dispatch_inner`] — pre-cancelled,
/// condition-skipped, condition-eval-failed, and the main retry/timeout
/// outcome all funnel through here, so every returned [`StepResult`]
/// (including `skipped`/`cancelled` ones) binds its output variable,
/// emits lifecycle events, and persists a checkpoint exactly once.
async fn finish(
    step: &Step,
    context: &ExecutionContext,
    dctx: &DispatchContext,
    started_at: DateTime<Utc>,
    status: StepStatus,
    output: Value,
    error: Option<String>,
    retry_count: u32,
) -> StepResult {
    if status == StepStatus::Completed {
        if let Some(output_name) = &step.output {
            context.set_variable(output_name.clone(), output.clone());
        }
    }

    let completed_at = Utc::now();
    let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
    context.record_step_metadata(step.id.clone(), duration_ms, status_label(status));

    let result = StepResult {
        step_id: step.id.clone(),
        status,
        output,
        error: error.clone(),
        retry_count,
        started_at,
        completed_at,
        duration_ms,
    };

    if status == StepStatus::Failed {
        if let Some(message) = &error {
            dctx.observers.on_step_error(context.run_id, step, message);
        }
    }
    dctx.observers.on_step_complete(context.run_id, &result);

    if let Some(sink) = &dctx.checkpoint {
        let snapshot = serde_json::to_value(context.variables_flat()).unwrap_or(Value::Null);
        if let Err(err) = sink.save_checkpoint(context.run_id, &step.id, snapshot).await {
            tracing::warn!(step_id = %step.id, error = %err, "checkpoint persistence failed");
        }
    }

    result
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
        StepStatus::Cancelled => "cancelled",
    }
}

/// Routes a step body to its leaf executor or, for control-flow kinds, to
/// [`crate::control::execute_control_flow`]. Boxed for the same reason
/// [`dispatch`] is: control-flow executors calling back into `dispatch`
/// calling back into this is mutual recursion across module boundaries.
fn run_kind<'a>(step: &'a Step, context: &'a ExecutionContext, dctx: &'a DispatchContext) -> BoxFuture<'a, Result<ExecResult>> {
    Box::pin(async move {
        match &step.kind {
            StepKind::Action(action) => run_action(action, step, context, dctx).await.map(ExecResult::Completed),
            StepKind::Workflow(call) => run_workflow_call(call, context, dctx).await.map(ExecResult::Completed),
            other => crate::control::execute_control_flow(other, step, context, dctx).await,
        }
    })
}

async fn run_action(action: &ActionStep, step: &Step, context: &ExecutionContext, dctx: &DispatchContext) -> Result<Value> {
    let executor = dctx.actions.get(&action.action).ok_or_else(|| OrchestratorError::InvalidStepConfig {
        step_id: step.id.clone(),
        reason: format!("no action registered for '{}'", action.action),
    })?;

    let resolved_params = resolver::resolve_templates(&serde_json::to_value(&action.params)?, context)?;
    let params: HashMap<String, Value> = match resolved_params {
        Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    };

    let executor_context = StepExecutorContext {
        step_id: step.id.clone(),
        params: params.clone(),
        permissions: step.permissions.clone(),
        base_path: None,
        cancellation: context.cancellation().clone(),
    };
    let resolved_action = ActionStep { action: action.action.clone(), params };

    executor.execute(&resolved_action, context, dctx.registry.as_ref(), &executor_context).await
}

/// A `workflow`-kind step loads and runs another workflow document inline,
/// on a fresh [`ExecutionContext`] that shares the parent run's
/// cancellation signal but has its own input/variable space. The nested
/// run's final step output becomes this step's output.
async fn run_workflow_call(call: &WorkflowCallStep, context: &ExecutionContext, dctx: &DispatchContext) -> Result<Value> {
    let loader = dctx
        .workflow_loader
        .as_ref()
        .ok_or_else(|| OrchestratorError::other("no workflow loader configured for nested workflow calls"))?;

    let resolved_inputs = resolver::resolve_templates(&serde_json::to_value(&call.inputs)?, context)?;
    let provided: HashMap<String, Value> = match resolved_inputs {
        Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    };

    let workflow = loader.load(&call.workflow_path).await?;
    workflow.validate()?;
    let resolved = workflow.resolve_inputs(provided)?;

    let child_context =
        ExecutionContext::new_with_cancellation(context.run_id, workflow.id.to_string(), resolved, context.cancellation().clone());

    let mut last_output = Value::Null;
    for child_step in &workflow.steps {
        let result = dispatch(child_step, &child_context, dctx).await;
        if matches!(result.status, StepStatus::Failed | StepStatus::Cancelled) {
            return Err(OrchestratorError::other(
                result.error.unwrap_or_else(|| format!("nested workflow step '{}' failed", result.step_id)),
            ));
        }
        last_output = result.output;
    }
    Ok(last_output)
}
