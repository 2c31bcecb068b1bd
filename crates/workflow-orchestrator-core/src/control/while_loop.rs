// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `while`: re-evaluate `condition` before each pass through
//! `steps`, bounded by `max_iterations` so a condition that never flips
//! can't hang a run forever.

use crate::condition;
use crate::context::ExecutionContext;
use crate::control::run_sequence;
use crate::dispatcher::DispatchContext;
use crate::error::{OrchestratorError, Result};
use crate::workflow::{ErrorAction, Step, WhileStep};
use serde_json::{json, Value};
use std::collections::HashMap;

pub async fn execute(step: &WhileStep, outer: &Step, context: &ExecutionContext, dctx: &DispatchContext) -> Result<Value> {
    let mut last_output = Value::Null;
    let mut iterations = 0usize;

    while condition::evaluate_condition(&step.condition, context)? {
        if iterations >= step.max_iterations {
            return Err(OrchestratorError::MaxIterations(step.max_iterations));
        }
        if context.cancellation().is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let guard = context.push_scope(HashMap::from([("loop".to_string(), json!({"index": iterations, "step": outer.id}))]));
        let outcome = run_sequence(&step.steps, context, dctx).await;
        guard.release();

        match outcome {
            Ok(outputs) => last_output = outputs.into_iter().last().unwrap_or(Value::Null),
            Err(err) if err.is_cancellation() => return Err(err),
            Err(err) if step.error_handling.action == ErrorAction::Continue => {
                last_output = json!({"status": "failed", "error": err.to_string()});
            }
            Err(err) => return Err(err),
        }
        iterations += 1;
    }

    Ok(last_output)
}
