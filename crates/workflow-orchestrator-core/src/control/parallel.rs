// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parallel`: run branches concurrently over isolated forked
//! contexts, bounded by `max_concurrent`, merging each branch's final
//! variables back under `branches.<branchId>` once it finishes.

use crate::context::ExecutionContext;
use crate::control::run_sequence;
use crate::dispatcher::DispatchContext;
use crate::error::{OrchestratorError, Result};
use crate::workflow::{OnError, ParallelStep};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub async fn execute(step: &ParallelStep, context: &ExecutionContext, dctx: &DispatchContext) -> Result<Value> {
    let bound = step.max_concurrent.or(dctx.default_max_concurrency);
    let semaphore = bound.filter(|n| *n > 0).map(|n| Arc::new(Semaphore::new(n)));

    let mut handles = Vec::with_capacity(step.branches.len());
    for branch in &step.branches {
        let branch_context = context.fork();
        let branch_steps = branch.steps.clone();
        let branch_id = branch.id.clone();
        let dctx = dctx.clone();
        let semaphore = semaphore.clone();

        handles.push(tokio::spawn(async move {
            let _permit = match &semaphore {
                Some(sem) => Some(sem.clone().acquire_owned().await),
                None => None,
            };
            let outcome = run_sequence(&branch_steps, &branch_context, &dctx).await;
            (branch_id, branch_context, outcome)
        }));
    }

    let mut branch_results = Vec::with_capacity(handles.len());
    let mut first_error: Option<OrchestratorError> = None;
    for handle in handles {
        let (branch_id, branch_context, outcome) = handle
            .await
            .map_err(|e| OrchestratorError::other(format!("parallel branch task panicked: {e}")))?;

        context.merge_branch(&branch_id, &branch_context);

        match outcome {
            Ok(outputs) => branch_results.push(Value::Array(outputs)),
            Err(err) => {
                // A branch that failed under `on_error: continue` has no real
                // output to report; `null` holds its place in the array so
                // branch order still lines up with `step.branches`.
                branch_results.push(Value::Null);
                if step.on_error == OnError::Stop && first_error.is_none() {
                    context.cancellation().cancel();
                    first_error = Some(OrchestratorError::other(format!("branch '{}' failed: {}", branch_id, err)));
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    Ok(Value::Array(branch_results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionExecutor, AdapterRegistry, ActionRouter, StaticAdapterRegistry, StepExecutorContext};
    use crate::events::ObserverChannel;
    use crate::workflow::{ActionStep, ParallelBranch, Step, StepKind};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct SetX;

    #[async_trait]
    impl ActionExecutor for SetX {
        async fn execute(
            &self,
            step: &ActionStep,
            context: &ExecutionContext,
            _registry: &dyn AdapterRegistry,
            _executor_context: &StepExecutorContext,
        ) -> Result<Value> {
            let value = step.params.get("value").cloned().unwrap_or(Value::Null);
            context.set_variable("x", value.clone());
            Ok(value)
        }
    }

    fn dctx() -> DispatchContext {
        DispatchContext {
            actions: ActionRouter::builder().register("set-x", Arc::new(SetX)).build(),
            registry: Arc::new(StaticAdapterRegistry::default()),
            observers: ObserverChannel::new(),
            checkpoint: None,
            workflow_loader: None,
            waits: crate::control::WaitRegistry::new(),
            default_max_concurrency: None,
        }
    }

    fn branch(id: &str, value: &str) -> ParallelBranch {
        ParallelBranch {
            id: id.into(),
            steps: vec![Step::leaf(
                "set",
                StepKind::Action(ActionStep { action: "set-x".into(), params: HashMap::from([("value".to_string(), Value::String(value.into()))]) }),
            )],
        }
    }

    #[tokio::test]
    async fn sibling_branches_do_not_observe_each_others_writes() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        context.set_variable("x", json!("base"));
        let step = ParallelStep { branches: vec![branch("branch0", "A"), branch("branch1", "B")], max_concurrent: None, on_error: OnError::default() };
        execute(&step, &context, &dctx()).await.unwrap();
        assert_eq!(context.get_variable("x"), Some(json!("base")));
        let branches = context.get_variable("branches").unwrap();
        assert_eq!(branches["branch0"]["x"], json!("A"));
        assert_eq!(branches["branch1"]["x"], json!("B"));
    }

    #[tokio::test]
    async fn output_is_a_bare_array_of_per_branch_output_lists_in_order() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        let step = ParallelStep { branches: vec![branch("branch0", "A"), branch("branch1", "B")], max_concurrent: None, on_error: OnError::default() };
        let output = execute(&step, &context, &dctx()).await.unwrap();
        assert_eq!(output, json!([["A"], ["B"]]));
    }

    #[tokio::test]
    async fn continue_on_error_places_null_for_the_failed_branch() {
        struct Boom;

        #[async_trait]
        impl ActionExecutor for Boom {
            async fn execute(
                &self,
                _step: &ActionStep,
                _context: &ExecutionContext,
                _registry: &dyn AdapterRegistry,
                _executor_context: &StepExecutorContext,
            ) -> Result<Value> {
                Err(crate::error::OrchestratorError::action("branch boom"))
            }
        }

        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        let mut dctx = dctx();
        dctx.actions = ActionRouter::builder().register("set-x", Arc::new(SetX)).register("boom", Arc::new(Boom)).build();
        let failing_branch = ParallelBranch { id: "branch1".into(), steps: vec![Step::leaf("b", StepKind::Action(ActionStep { action: "boom".into(), params: HashMap::new() }))] };
        let step = ParallelStep { branches: vec![branch("branch0", "A"), failing_branch], max_concurrent: None, on_error: OnError::Continue };
        let output = execute(&step, &context, &dctx).await.unwrap();
        assert_eq!(output, json!([["A"], null]));
    }
}
