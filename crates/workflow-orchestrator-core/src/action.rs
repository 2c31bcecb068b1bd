// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Action Executor contract and the Adapter
//! Registry it's the sole consumer of.
//!
//! The core does not interpret an action's output beyond binding it into
//! `context.variables` — an action is an opaque async function from
//! `(step, context, registry, executor-context)` to a JSON value or an
//! error, modeled as a trait object so the registry can hold a
//! heterogeneous set of action implementations behind `Arc<dyn
//! ActionExecutor>`.

use crate::context::{CancellationToken, ExecutionContext};
use crate::error::OrchestratorError;
use crate::workflow::{ActionStep, ToolBinding};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Effective per-step execution context handed to an action: resolved
/// parameters, the step's permissions, a base path for filesystem-facing
/// adapters, and the run's cancellation signal.
#[derive(Clone)]
pub struct StepExecutorContext {
    pub step_id: String,
    pub params: HashMap<String, Value>,
    pub permissions: Vec<String>,
    pub base_path: Option<String>,
    pub cancellation: CancellationToken,
}

/// A leaf action implementation. The engine invokes `execute` for every
/// `action`-kind step; the registry lookup by `action.action` name (a
/// bound tool) is the implementation's responsibility, not the core's.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &ActionStep,
        context: &ExecutionContext,
        registry: &dyn AdapterRegistry,
        executor_context: &StepExecutorContext,
    ) -> Result<Value, OrchestratorError>;
}

/// `load(sdkName) -> adapter`, `has(sdkName) -> bool`, plus the
/// workflow-declared tool bindings — consumed exclusively by the action
/// executor, never by control-flow executors.
pub trait AdapterRegistry: Send + Sync {
    fn has(&self, sdk_name: &str) -> bool;
    fn load(&self, sdk_name: &str) -> Option<Arc<dyn std::any::Any + Send + Sync>>;
    fn tool_binding(&self, tool_name: &str) -> Option<ToolBinding>;
}

/// A minimal in-memory registry sufficient for tests and the reference
/// CLI: tool bindings only, no SDK-handle loading.
#[derive(Default)]
pub struct StaticAdapterRegistry {
    tools: HashMap<String, ToolBinding>,
}

impl StaticAdapterRegistry {
    pub fn new(tools: HashMap<String, ToolBinding>) -> Self {
        Self { tools }
    }
}

impl AdapterRegistry for StaticAdapterRegistry {
    fn has(&self, sdk_name: &str) -> bool {
        self.tools.values().any(|t| t.adapter == sdk_name)
    }

    fn load(&self, _sdk_name: &str) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        None
    }

    fn tool_binding(&self, tool_name: &str) -> Option<ToolBinding> {
        self.tools.get(tool_name).cloned()
    }
}

/// Dispatches an action step to the registered action name. `actions` maps
/// a tool/action name (`ActionStep::action`) directly to its executor —
/// the thinnest possible shape of the "adapter registry" the action
/// executor consults; richer registries (SDK handles, per-workflow tool
/// bindings) can wrap this with [`AdapterRegistry`].
#[derive(Clone, Default)]
pub struct ActionRouter {
    actions: Arc<HashMap<String, Arc<dyn ActionExecutor>>>,
}

impl ActionRouter {
    pub fn builder() -> ActionRouterBuilder {
        ActionRouterBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.actions.get(name).cloned()
    }
}

#[derive(Default)]
pub struct ActionRouterBuilder {
    actions: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ActionRouterBuilder {
    pub fn register(mut self, name: impl Into<String>, executor: Arc<dyn ActionExecutor>) -> Self {
        self.actions.insert(name.into(), executor);
        self
    }

    pub fn build(self) -> ActionRouter {
        ActionRouter { actions: Arc::new(self.actions) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAction;

    #[async_trait]
    impl ActionExecutor for EchoAction {
        async fn execute(
            &self,
            step: &ActionStep,
            _context: &ExecutionContext,
            _registry: &dyn AdapterRegistry,
            _executor_context: &StepExecutorContext,
        ) -> Result<Value, OrchestratorError> {
            Ok(Value::String(step.action.clone()))
        }
    }

    #[tokio::test]
    async fn router_dispatches_by_registered_name() {
        let router = ActionRouter::builder().register("echo", Arc::new(EchoAction)).build();
        assert!(router.get("echo").is_some());
        assert!(router.get("missing").is_none());
    }
}
