// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control-flow executors: one module per non-leaf [`StepKind`].
//!
//! Every executor here is a plain async function taking its kind-specific
//! struct, the enclosing [`Step`] (for id/name in error messages), the
//! [`ExecutionContext`] it runs against, and the [`DispatchContext`] it
//! reenters [`crate::dispatcher::dispatch`] through for child steps.
//! [`execute_control_flow`] is the single entry point [`crate::dispatcher`]
//! calls for anything that isn't a leaf.

mod for_each;
mod if_then;
mod map_filter_reduce;
mod merge;
mod parallel;
mod script;
mod switch;
mod try_catch;
mod wait;
mod while_loop;

pub use wait::WaitRegistry;

use crate::context::ExecutionContext;
use crate::dispatcher::{DispatchContext, ExecResult};
use crate::error::{OrchestratorError, Result};
use crate::workflow::{Step, StepKind};
use serde_json::Value;

pub(crate) async fn execute_control_flow(
    kind: &StepKind,
    step: &Step,
    context: &ExecutionContext,
    dctx: &DispatchContext,
) -> Result<ExecResult> {
    match kind {
        StepKind::Action(_) | StepKind::Workflow(_) => {
            unreachable!("leaf kinds are routed by the dispatcher before reaching control-flow dispatch")
        }
        StepKind::If(s) => if_then::execute(s, context, dctx).await,
        StepKind::Switch(s) => switch::execute(s, context, dctx).await,
        StepKind::ForEach(s) => for_each::execute(s, context, dctx).await,
        StepKind::While(s) => while_loop::execute(s, step, context, dctx).await.map(ExecResult::Completed),
        StepKind::Map(s) => map_filter_reduce::execute_map(s, context).map(ExecResult::Completed),
        StepKind::Filter(s) => map_filter_reduce::execute_filter(s, context).map(ExecResult::Completed),
        StepKind::Reduce(s) => map_filter_reduce::execute_reduce(s, context).map(ExecResult::Completed),
        StepKind::Parallel(s) => parallel::execute(s, context, dctx).await.map(ExecResult::Completed),
        StepKind::TryCatch(s) => try_catch::execute(s, context, dctx).await.map(ExecResult::Completed),
        StepKind::Script(s) => script::execute(s, context).map(ExecResult::Completed),
        StepKind::Wait(s) => wait::execute(s, step, context, dctx).await,
        StepKind::Merge(s) => merge::execute(s, context).map(ExecResult::Completed),
    }
}

/// Shared helper: runs a child step list sequentially against `context`,
/// short-circuiting on the first failed/cancelled result. Returns every
/// completed/skipped child's output, in order — callers that want a single
/// value (`try_catch`) fold it themselves; callers that must report a list
/// of child outputs (`if`/`switch`, a `parallel` branch) use it as-is.
pub(crate) async fn run_sequence(steps: &[Step], context: &ExecutionContext, dctx: &DispatchContext) -> Result<Vec<Value>> {
    let mut outputs = Vec::with_capacity(steps.len());
    for child in steps {
        let result = crate::dispatcher::dispatch(child, context, dctx).await;
        match result.status {
            crate::dispatcher::StepStatus::Completed | crate::dispatcher::StepStatus::Skipped => {
                outputs.push(result.output);
            }
            crate::dispatcher::StepStatus::Cancelled => return Err(OrchestratorError::Cancelled),
            crate::dispatcher::StepStatus::Failed => {
                return Err(OrchestratorError::StepFailed {
                    step_id: result.step_id.clone(),
                    message: result.error.unwrap_or_else(|| format!("step '{}' failed", result.step_id)),
                });
            }
        }
    }
    Ok(outputs)
}
