// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `http` action: issues a request with `reqwest` and binds the
//! response status and body (parsed as JSON when the content type allows,
//! otherwise as a string) as output.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use workflow_orchestrator_core::action::{AdapterRegistry, StepExecutorContext};
use workflow_orchestrator_core::context::ExecutionContext;
use workflow_orchestrator_core::error::{OrchestratorError, Result};
use workflow_orchestrator_core::workflow::ActionStep;
use workflow_orchestrator_core::ActionExecutor;

pub struct HttpAction {
    client: reqwest::Client,
}

impl Default for HttpAction {
    fn default() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with default TLS config"),
        }
    }
}

#[async_trait]
impl ActionExecutor for HttpAction {
    async fn execute(
        &self,
        step: &ActionStep,
        _context: &ExecutionContext,
        _registry: &dyn AdapterRegistry,
        executor_context: &StepExecutorContext,
    ) -> Result<Value> {
        let url = step.params.get("url").and_then(Value::as_str).ok_or_else(|| OrchestratorError::InvalidStepConfig {
            step_id: executor_context.step_id.clone(),
            reason: "http action requires a string 'url' param".into(),
        })?;
        let method = step.params.get("method").and_then(Value::as_str).unwrap_or("GET").to_uppercase();

        let mut request = self
            .client
            .request(method.parse().map_err(|_| OrchestratorError::InvalidStepConfig {
                step_id: executor_context.step_id.clone(),
                reason: format!("unsupported HTTP method '{method}'"),
            })?, url);

        if let Some(headers) = step.params.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }

        if let Some(body) = step.params.get("body") {
            request = request.json(body);
        }

        debug!(step_id = %executor_context.step_id, url, method, "issuing http request");

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                OrchestratorError::retryable_action(err.to_string())
            } else {
                OrchestratorError::action(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("json"));

        let body_text = response.text().await.map_err(|err| OrchestratorError::action(err.to_string()))?;
        let body = if is_json {
            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text))
        } else {
            Value::String(body_text)
        };

        if let Some(err) = status_error(status) {
            return Err(err);
        }

        Ok(json!({ "status": status, "body": body }))
    }
}

/// Classifies a non-2xx HTTP status into an error — `retryable` for 5xx
/// and 429 (rate limiting, often transient), not for other 4xx client
/// errors that will fail identically on retry. `None` for a 2xx status.
fn status_error(status: u16) -> Option<OrchestratorError> {
    if (200..300).contains(&status) {
        return None;
    }
    Some(if status >= 500 || status == 429 {
        OrchestratorError::retryable_action(format!("http {status}"))
    } else {
        OrchestratorError::action(format!("http {status}"))
    })
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
            step_id: "http-step".into(),
            params: HashMap::new(),
            permissions: vec![],
            base_path: None,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn missing_url_is_an_invalid_step_config() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        let registry = StaticAdapterRegistry::default();
        let step = ActionStep { action: "http".into(), params: HashMap::new() };
        let result = HttpAction::default().execute(&step, &context, &registry, &executor_context()).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidStepConfig { .. })));
    }

    #[tokio::test]
    async fn unsupported_method_is_an_invalid_step_config() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf", HashMap::new());
        let registry = StaticAdapterRegistry::default();
        let step = ActionStep {
            action: "http".into(),
            params: HashMap::from([
                ("url".to_string(), Value::String("http://localhost/".into())),
                ("method".to_string(), Value::String("NOT-A-METHOD ".into())),
            ]),
        };
        let result = HttpAction::default().execute(&step, &context, &registry, &executor_context()).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidStepConfig { .. })));
    }

    #[test]
    fn server_errors_and_rate_limits_are_retryable() {
        assert!(status_error(500).unwrap().is_retryable());
        assert!(status_error(503).unwrap().is_retryable());
        assert!(status_error(429).unwrap().is_retryable());
    }

    #[test]
    fn client_errors_other_than_429_are_not_retryable() {
        assert!(!status_error(400).unwrap().is_retryable());
        assert!(!status_error(404).unwrap().is_retryable());
    }

    #[test]
    fn success_statuses_produce_no_error() {
        assert!(status_error(200).is_none());
        assert!(status_error(204).is_none());
    }
}
