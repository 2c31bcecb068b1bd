// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `try_catch`: run `try`; on failure, bind a loop-local `error`
//! variable and run `catch`; `finally` always runs last. `finally`'s
//! failure never changes the step's outcome — a successful `try`/`catch`
//! stays successful, and an uncaught `try` failure stays that failure.
//! `finally`'s own output only replaces the returned value when the prior
//! outcome was `Ok`.

use crate::context::ExecutionContext;
use crate::control::run_sequence;
use crate::dispatcher::DispatchContext;
use crate::error::Result;
use crate::workflow::TryCatchStep;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Folds a child step list's outputs down to the single value a `try_catch`
/// step's branch reports — the last child's output, `Null` for an empty list.
fn last_output(outputs: Vec<Value>) -> Value {
    outputs.into_iter().last().unwrap_or(Value::Null)
}

pub async fn execute(step: &TryCatchStep, context: &ExecutionContext, dctx: &DispatchContext) -> Result<Value> {
    let try_outcome = run_sequence(&step.r#try, context, dctx).await.map(last_output);

    let outcome = match try_outcome {
        Ok(output) => Ok(output),
        Err(err) if err.is_cancellation() => Err(err),
        Err(err) => match &step.catch {
            Some(catch_steps) => {
                let (failing_step, message) = err.step_and_message();
                let error_value = json!({"message": message, "step": failing_step});
                let guard = context.push_scope(HashMap::from([("error".to_string(), error_value)]));
                let caught = run_sequence(catch_steps, context, dctx).await.map(last_output);
                guard.release();
                caught
            }
            None => Err(err),
        },
    };

    if let Some(finally_steps) = &step.finally {
        let finally_outcome = run_sequence(finally_steps, context, dctx).await.map(last_output);
        return match (outcome, finally_outcome) {
            (Ok(_), Ok(finally_output)) => Ok(finally_output),
            (Ok(output), Err(_)) => Ok(output),
            (Err(err), _) => Err(err),
        };
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionExecutor, AdapterRegistry, ActionRouter, StaticAdapterRegistry, StepExecutorContext};
    use crate::events::ObserverChannel;
    use crate::workflow::{ActionStep, Step, StepKind};
    use async_trait::async_trait;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fails;

    #[async_trait]
    impl ActionExecutor for Fails {
        async fn execute(
            &self,
            _step: &ActionStep,
            _context: &ExecutionContext,
            _registry: &dyn AdapterRegistry,
            _executor_context: &StepExecutorContext,
        ) -> Result<Value> {
            Err(crate::error::OrchestratorError::action("boom"))
        }
    }

    struct ReadsError;

    #[async_trait]
    impl ActionExecutor for ReadsError {
        async fn execute(
            &self,
            _step: &ActionStep,
            context: &ExecutionContext,
            _registry: &dyn AdapterRegistry,
            _executor_context: &StepExecutorContext,
        ) -> Result<Value> {
            Ok(context.get_variable("error").unwrap_or(Value::Null))
        }
    }

    fn dctx() -> DispatchContext {
        DispatchContext {
            actions: ActionRouter::builder().register("fails", Arc::new(Fails)).register("reads-error", Arc::new(ReadsError)).build(),
            registry: Arc::new(StaticAdapterRegistry::default()),
            observers: ObserverChannel::new(),
            checkpoint: None,
            workflow_loader: None,
            waits: crate::control::WaitRegistry::new(),
            default_max_concurrency: None,
        }
    }

    fn leaf(id: &str, action: &str) -> Step {
        Step::leaf(id, StepKind::Action(ActionStep { action: action.into(), params: Default::default() }))
    }

    #[tokio::test]
    async fn catch_sees_error_variable_and_its_result_becomes_output() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", Default::default());
        let step = TryCatchStep { r#try: vec![leaf("t", "fails")], catch: Some(vec![leaf("c", "reads-error")]), finally: None };
        let output = execute(&step, &context, &dctx()).await.unwrap();
        assert_eq!(output, json!({"message": "action error: boom", "step": "t"}));
    }

    #[tokio::test]
    async fn error_variable_does_not_leak_past_catch() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", Default::default());
        let step = TryCatchStep { r#try: vec![leaf("t", "fails")], catch: Some(vec![leaf("c", "reads-error")]), finally: None };
        execute(&step, &context, &dctx()).await.unwrap();
        assert_eq!(context.get_variable("error"), None);
    }

    #[tokio::test]
    async fn finally_output_overwrites_try_output() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", Default::default());
        let step = TryCatchStep { r#try: vec![leaf("t", "reads-error")], catch: None, finally: Some(vec![leaf("f", "reads-error")]) };
        let output = execute(&step, &context, &dctx()).await.unwrap();
        assert_eq!(output, Value::Null);
    }

    #[tokio::test]
    async fn uncaught_error_without_catch_propagates() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", Default::default());
        let step = TryCatchStep { r#try: vec![leaf("t", "fails")], catch: None, finally: None };
        let result = execute(&step, &context, &dctx()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn finally_failure_does_not_downgrade_a_successful_outcome() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", Default::default());
        let step = TryCatchStep { r#try: vec![leaf("t", "reads-error")], catch: None, finally: Some(vec![leaf("f", "fails")]) };
        let output = execute(&step, &context, &dctx()).await.unwrap();
        assert_eq!(output, Value::Null);
    }

    #[tokio::test]
    async fn finally_success_does_not_resurrect_an_uncaught_failure() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", Default::default());
        let step = TryCatchStep { r#try: vec![leaf("t", "fails")], catch: None, finally: Some(vec![leaf("f", "reads-error")]) };
        let result = execute(&step, &context, &dctx()).await;
        assert!(result.is_err());
    }
}
