// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `log` action: emits a `tracing` event at a configurable level and
//! echoes its `message` param back as output, so a workflow can both
//! observe progress in its own logs and bind the message downstream.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use workflow_orchestrator_core::action::{AdapterRegistry, StepExecutorContext};
use workflow_orchestrator_core::context::ExecutionContext;
use workflow_orchestrator_core::error::{OrchestratorError, Result};
use workflow_orchestrator_core::workflow::ActionStep;
use workflow_orchestrator_core::ActionExecutor;

pub struct LogAction;

#[async_trait]
impl ActionExecutor for LogAction {
    async fn execute(
        &self,
        step: &ActionStep,
        _context: &ExecutionContext,
        _registry: &dyn AdapterRegistry,
        executor_context: &StepExecutorContext,
    ) -> Result<Value> {
        let message = step
            .params
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| OrchestratorError::InvalidStepConfig {
                step_id: executor_context.step_id.clone(),
                reason: "log action requires a string 'message' param".into(),
            })?;

        match step.params.get("level").and_then(Value::as_str).unwrap_or("info") {
            "debug" => debug!(step_id = %executor_context.step_id, "{message}"),
            "warn" => warn!(step_id = %executor_context.step_id, "{message}"),
            "error" => error!(step_id = %executor_context.step_id, "{message}"),
            _ => info!(step_id = %executor_context.step_id, "{message}"),
        }

        Ok(Value::String(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;
    use workflow_orchestrator_core::action::StaticAdapterRegistry;
    use workflow_orchestrator_core::context::CancellationToken;

    fn executor_context() -> StepExecutorContext {
        StepExecutorContext {
            step_id: "log-step".into(),
            params: HashMap::new(),
            permissions: vec![],
            base_path: None,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn echoes_the_message_back_as_output() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        let registry = StaticAdapterRegistry::default();
        let step = ActionStep {
            action: "log".into(),
            params: HashMap::from([("message".to_string(), Value::String("hello".into()))]),
        };
        let output = LogAction.execute(&step, &context, &registry, &executor_context()).await.unwrap();
        assert_eq!(output, Value::String("hello".into()));
    }

    #[tokio::test]
    async fn missing_message_is_an_invalid_step_config() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        let registry = StaticAdapterRegistry::default();
        let step = ActionStep { action: "log".into(), params: HashMap::new() };
        let result = LogAction.execute(&step, &context, &registry, &executor_context()).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidStepConfig { .. })));
    }
}
