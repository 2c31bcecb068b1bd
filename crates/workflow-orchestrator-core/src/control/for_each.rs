// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `for_each`: iterate `items`, binding `item_variable` (and
//! optionally `index_variable`) as loop-local variables for each pass
//! through `steps`. Supports batched iteration via `batch_size` with an
//! optional pause between batches.

use crate::context::ExecutionContext;
use crate::control::run_sequence;
use crate::dispatcher::{DispatchContext, ExecResult};
use crate::error::{OrchestratorError, Result};
use crate::resolver;
use crate::workflow::{ErrorAction, ForEachStep};
use serde_json::{json, Value};
use std::collections::HashMap;

pub async fn execute(step: &ForEachStep, context: &ExecutionContext, dctx: &DispatchContext) -> Result<ExecResult> {
    let items = resolver::resolve_sequence(&step.items, context)?
        .ok_or_else(|| OrchestratorError::Condition(format!("'{}' did not resolve to a sequence", step.items)))?;

    if items.is_empty() {
        return Ok(ExecResult::Skipped(Value::Array(Vec::new())));
    }

    let length = items.len();
    let batched = step.batch_size.filter(|n| *n > 0);
    let batch_size = batched.unwrap_or(length.max(1));
    let mut results = Vec::with_capacity(length);

    for (batch_index, batch) in items.chunks(batch_size.max(1)).enumerate() {
        if context.cancellation().is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let batch_start = batch_index * batch_size;
        for (offset, item) in batch.iter().enumerate() {
            let index = batch_start + offset;
            let mut locals = HashMap::new();
            locals.insert(step.item_variable.clone(), item.clone());
            if let Some(index_var) = &step.index_variable {
                locals.insert(index_var.clone(), json!(index));
            }
            locals.insert(
                "loop".to_string(),
                json!({"index": index, "first": index == 0, "last": index == length - 1, "length": length}),
            );
            if batched.is_some() {
                locals.insert(
                    "batch".to_string(),
                    json!({"batchSize": batch_size, "batchStart": batch_start, "totalItems": length}),
                );
            }
            let guard = context.push_scope(locals);
            let outcome = run_sequence(&step.steps, context, dctx).await;
            guard.release();

            match outcome {
                Ok(outputs) => results.push(json!({"index": index, "status": "completed", "output": outputs})),
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    results.push(json!({"index": index, "status": "failed", "error": err.to_string()}));
                    if step.error_handling.action == ErrorAction::Stop {
                        return Err(err);
                    }
                }
            }
        }
        if let (Some(pause_ms), true) = (step.pause_between_batches_ms, (batch_index + 1) * batch_size < length) {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(pause_ms)) => {}
                _ = context.cancellation().cancelled() => return Err(OrchestratorError::Cancelled),
            }
        }
    }

    Ok(ExecResult::Completed(Value::Array(results)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionExecutor, AdapterRegistry, ActionRouter, StaticAdapterRegistry, StepExecutorContext};
    use crate::events::ObserverChannel;
    use crate::workflow::{ActionStep, ErrorHandling, Step, StepKind};
    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    struct MaybeFail;

    #[async_trait]
    impl ActionExecutor for MaybeFail {
        async fn execute(
            &self,
            step: &ActionStep,
            _context: &ExecutionContext,
            _registry: &dyn AdapterRegistry,
            _executor_context: &StepExecutorContext,
        ) -> Result<Value> {
            if step.params.get("item").and_then(|v| v.as_i64()) == Some(2) {
                Err(OrchestratorError::action("item 2 is cursed"))
            } else {
                Ok(step.params.get("item").cloned().unwrap_or(Value::Null))
            }
        }
    }

    fn dctx() -> DispatchContext {
        DispatchContext {
            actions: ActionRouter::builder().register("maybe-fail", Arc::new(MaybeFail)).build(),
            registry: Arc::new(StaticAdapterRegistry::default()),
            observers: ObserverChannel::new(),
            checkpoint: None,
            workflow_loader: None,
            waits: crate::control::WaitRegistry::new(),
            default_max_concurrency: None,
        }
    }

    fn body() -> Vec<Step> {
        vec![Step::leaf(
            "body",
            StepKind::Action(ActionStep {
                action: "maybe-fail".into(),
                params: HashMap::from([("item".to_string(), Value::String("{{ item }}".into()))]),
            }),
        )]
    }

    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn continue_on_error_keeps_processing_remaining_items() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        context.set_variable("items", json!([1, 2, 3]));
        let step = ForEachStep {
            items: "{{ items }}".into(),
            item_variable: "item".into(),
            index_variable: None,
            steps: body(),
            error_handling: ErrorHandling { action: ErrorAction::Continue },
            batch_size: None,
            pause_between_batches_ms: None,
        };
        let (status, output) = execute(&step, &context, &dctx()).await.unwrap().into_parts();
        assert_eq!(status, crate::dispatcher::StepStatus::Completed);
        let arr = output.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[1]["status"], json!("failed"));
        assert_eq!(arr[2]["status"], json!("completed"));
    }

    #[tokio::test]
    async fn stop_on_error_halts_remaining_items() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        context.set_variable("items", json!([1, 2, 3]));
        let step = ForEachStep {
            items: "{{ items }}".into(),
            item_variable: "item".into(),
            index_variable: None,
            steps: body(),
            error_handling: ErrorHandling { action: ErrorAction::Stop },
            batch_size: None,
            pause_between_batches_ms: None,
        };
        let result = execute(&step, &context, &dctx()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn loop_local_item_variable_does_not_leak() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        context.set_variable("items", json!([1]));
        let step = ForEachStep {
            items: "{{ items }}".into(),
            item_variable: "item".into(),
            index_variable: Some("idx".into()),
            steps: body(),
            error_handling: ErrorHandling::default(),
            batch_size: None,
            pause_between_batches_ms: None,
        };
        execute(&step, &context, &dctx()).await.unwrap();
        assert_eq!(context.get_variable("item"), None);
        assert_eq!(context.get_variable("idx"), None);
    }

    #[tokio::test]
    async fn empty_items_is_skipped_with_empty_output() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        context.set_variable("items", json!([]));
        let step = ForEachStep {
            items: "{{ items }}".into(),
            item_variable: "item".into(),
            index_variable: None,
            steps: body(),
            error_handling: ErrorHandling::default(),
            batch_size: None,
            pause_between_batches_ms: None,
        };
        let (status, output) = execute(&step, &context, &dctx()).await.unwrap().into_parts();
        assert_eq!(status, crate::dispatcher::StepStatus::Skipped);
        assert_eq!(output, json!([]));
    }

    #[tokio::test]
    async fn loop_local_exposes_index_first_last_and_length() {
        struct CaptureLoop;

        #[async_trait]
        impl ActionExecutor for CaptureLoop {
            async fn execute(
                &self,
                _step: &ActionStep,
                context: &ExecutionContext,
                _registry: &dyn AdapterRegistry,
                _executor_context: &StepExecutorContext,
            ) -> Result<Value> {
                Ok(context.get_variable("loop").unwrap_or(Value::Null))
            }
        }

        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        context.set_variable("items", json!(["a", "b"]));
        let step = ForEachStep {
            items: "{{ items }}".into(),
            item_variable: "item".into(),
            index_variable: None,
            steps: vec![Step::leaf("capture", StepKind::Action(ActionStep { action: "capture-loop".into(), params: HashMap::new() }))],
            error_handling: ErrorHandling::default(),
            batch_size: None,
            pause_between_batches_ms: None,
        };
        let dctx = DispatchContext {
            actions: ActionRouter::builder().register("capture-loop", Arc::new(CaptureLoop)).build(),
            registry: Arc::new(StaticAdapterRegistry::default()),
            observers: ObserverChannel::new(),
            checkpoint: None,
            workflow_loader: None,
            waits: crate::control::WaitRegistry::new(),
            default_max_concurrency: None,
        };
        let (_, output) = execute(&step, &context, &dctx).await.unwrap().into_parts();
        let arr = output.as_array().unwrap();
        assert_eq!(arr[0]["output"], json!([{"index": 0, "first": true, "last": false, "length": 2}]));
        assert_eq!(arr[1]["output"], json!([{"index": 1, "first": false, "last": true, "length": 2}]));
    }
}
