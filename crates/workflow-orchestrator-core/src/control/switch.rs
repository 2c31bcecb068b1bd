// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `switch`: resolve an expression to a string key, run the
//! matching case, falling back to `default`.

use crate::context::ExecutionContext;
use crate::control::run_sequence;
use crate::dispatcher::{DispatchContext, ExecResult};
use crate::error::Result;
use crate::resolver;
use crate::workflow::SwitchStep;
use serde_json::Value;

pub async fn execute(step: &SwitchStep, context: &ExecutionContext, dctx: &DispatchContext) -> Result<ExecResult> {
    let key = resolver::resolve_template_string(&step.expression, context)?;
    let branch = step.cases.get(&key).or(step.default.as_ref());

    match branch {
        Some(case_steps) if !case_steps.is_empty() => {
            let outputs = run_sequence(case_steps, context, dctx).await?;
            Ok(ExecResult::Completed(Value::Array(outputs)))
        }
        _ => Ok(ExecResult::Skipped(Value::Array(Vec::new()))),
    }
}
