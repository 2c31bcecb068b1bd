// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the execution engine core.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors surfaced by the execution engine.
///
/// Each variant corresponds to one of the error kinds enumerated in the
/// engine's error-handling design: validation errors are reported before
/// any step runs, the rest are attached to a `StepResult` or to the run's
/// terminal status.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A declared input was missing or a workflow document was malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// A step referenced an id that does not exist in the workflow.
    #[error("step not found: {0}")]
    StepNotFound(String),

    /// A step's configuration did not match its declared kind.
    #[error("invalid step config for '{step_id}': {reason}")]
    InvalidStepConfig { step_id: String, reason: String },

    /// `items`/`sources` did not resolve to a sequence, or a merge mode
    /// required `matchField` and it was absent.
    #[error("condition error: {0}")]
    Condition(String),

    /// A leaf action raised an error. `retryable` mirrors the flag the
    /// action attached; the dispatcher trusts it verbatim.
    #[error("action error: {message}")]
    Action { message: String, retryable: bool },

    /// A step exceeded its configured deadline.
    #[error("step timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The run's cancellation signal was observed.
    #[error("execution cancelled")]
    Cancelled,

    /// The sandboxed script runner returned an error.
    #[error("script error: {0}")]
    Script(String),

    /// A `while` loop exceeded `maxIterations`.
    #[error("while loop exceeded max iterations ({0})")]
    MaxIterations(usize),

    /// A child step run through [`crate::control::run_sequence`] failed.
    /// Carries the failing step's id so callers (`try_catch`'s `catch`
    /// binding) can report which step broke without reparsing the message.
    #[error("step '{step_id}' failed: {message}")]
    StepFailed { step_id: String, message: String },

    /// A `wait` step's mode was unknown or missing required fields.
    #[error("wait invariant violated: {0}")]
    WaitInvariant(String),

    /// The durable state store failed.
    #[error("state store error: {0}")]
    Store(String),

    /// Template rendering failed in a way that isn't the "undefined path"
    /// case (e.g. malformed template syntax).
    #[error("template error: {0}")]
    Template(String),

    /// Catch-all for errors that don't fit another category.
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    /// Builds an [`OrchestratorError::Other`] from any displayable value.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Builds a retryable [`OrchestratorError::Action`].
    pub fn retryable_action(msg: impl Into<String>) -> Self {
        Self::Action {
            message: msg.into(),
            retryable: true,
        }
    }

    /// Builds a non-retryable [`OrchestratorError::Action`].
    pub fn action(msg: impl Into<String>) -> Self {
        Self::Action {
            message: msg.into(),
            retryable: false,
        }
    }

    /// Whether the dispatcher's retry policy should redispatch on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Action { retryable: true, .. })
    }

    /// Whether this error represents cancellation rather than failure.
    /// Cancellation beats failure: callers should check this before
    /// recording a step/run as merely "failed".
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Extracts `(step_id, message)` for building a `catch` block's `error`
    /// binding. Falls back to `(None, self.to_string())` for variants that
    /// don't carry a step id.
    pub fn step_and_message(&self) -> (Option<&str>, String) {
        match self {
            Self::StepFailed { step_id, message } => (Some(step_id.as_str()), message.clone()),
            other => (None, other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Template(err.to_string())
    }
}

impl From<handlebars::RenderError> for OrchestratorError {
    fn from(err: handlebars::RenderError) -> Self {
        Self::Template(err.to_string())
    }
}

impl From<handlebars::TemplateError> for OrchestratorError {
    fn from(err: handlebars::TemplateError) -> Self {
        Self::Template(err.to_string())
    }
}
