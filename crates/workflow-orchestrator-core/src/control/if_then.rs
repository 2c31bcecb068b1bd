// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `if`: evaluate a condition, run `then` or `else`.

use crate::condition;
use crate::context::ExecutionContext;
use crate::control::run_sequence;
use crate::dispatcher::{DispatchContext, ExecResult};
use crate::error::Result;
use crate::workflow::IfStep;
use serde_json::Value;

pub async fn execute(step: &IfStep, context: &ExecutionContext, dctx: &DispatchContext) -> Result<ExecResult> {
    let branch = if condition::evaluate_condition(&step.condition, context)? {
        Some(&step.then)
    } else {
        step.r#else.as_ref()
    };

    match branch {
        Some(branch_steps) if !branch_steps.is_empty() => {
            let outputs = run_sequence(branch_steps, context, dctx).await?;
            Ok(ExecResult::Completed(Value::Array(outputs)))
        }
        _ => Ok(ExecResult::Skipped(Value::Array(Vec::new()))),
    }
}
