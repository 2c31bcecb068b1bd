// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `script`: a sandboxed expression, not an embedded scripting
//! language.
//!
//! No general-purpose script engine is pulled in — `code` is resolved
//! through the same template/path resolver as every other field, then
//! parsed as a JSON literal when it looks like one (`"text"`, `42`,
//! `true`, `[1,2]`, `{"a":1}`). This keeps the "no host-language escape"
//! guarantee the condition evaluator already gives us rather than
//! embedding an interpreter whose surface we'd have to sandbox ourselves.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::resolver;
use crate::workflow::ScriptStep;
use serde_json::Value;

pub fn execute(step: &ScriptStep, context: &ExecutionContext) -> Result<Value> {
    let rendered = resolver::resolve_template_string(&step.code, context)?;
    match serde_json::from_str::<Value>(rendered.trim()) {
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(rendered)),
    }
}
