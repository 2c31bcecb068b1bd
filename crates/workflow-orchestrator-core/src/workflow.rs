// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The read-only workflow data model produced by the (external) parser.
//!
//! `Step` is modeled as a tagged variant (`StepKind`) with one case per
//! control-flow/leaf kind rather than a loosely-typed `kind` string plus a
//! grab-bag of optional fields. A single dispatch function in
//! [`crate::dispatcher`] pattern-matches on it.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// A declared workflow input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDeclaration {
    pub name: String,
    #[serde(rename = "type", default = "default_input_type")]
    pub input_type: InputType,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    /// Regex-style validation applied to string inputs.
    #[serde(default)]
    pub validation: Option<String>,
}

fn default_input_type() -> InputType {
    InputType::String
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

/// A named adapter configuration a workflow binds a tool name to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolBinding {
    pub adapter: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

/// A workflow: identifier, declared inputs, tool bindings, and an ordered
/// sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputDeclaration>,
    #[serde(default)]
    pub tools: HashMap<String, ToolBinding>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Workflow {
    /// Validates declared inputs against a resolved input mapping,
    /// applying defaults and rejecting missing required inputs.
    ///
    /// Validation errors are reported to the caller before any step
    /// runs; no persisted failure is produced for them.
    pub fn resolve_inputs(&self, provided: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let mut resolved = provided;
        for decl in &self.inputs {
            if !resolved.contains_key(&decl.name) {
                if let Some(default) = &decl.default {
                    resolved.insert(decl.name.clone(), default.clone());
                } else if decl.required {
                    return Err(OrchestratorError::Validation(format!(
                        "missing required input '{}'",
                        decl.name
                    )));
                }
            }
            if let Some(value) = resolved.get(&decl.name) {
                validate_input_type(&decl.name, value, decl.input_type)?;
                if let (Some(pattern), Some(s)) = (&decl.validation, value.as_str()) {
                    let re = regex::Regex::new(pattern)
                        .map_err(|e| OrchestratorError::Validation(format!(
                            "invalid validation pattern for input '{}': {}",
                            decl.name, e
                        )))?;
                    if !re.is_match(s) {
                        return Err(OrchestratorError::Validation(format!(
                            "input '{}' failed validation pattern '{}'",
                            decl.name, pattern
                        )));
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Performs structural validation: unique step ids (including nested),
    /// well-formed merge/wait configurations. Does not execute anything.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::Validation("workflow name must not be empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        validate_steps(&self.steps, &mut seen)?;
        Ok(())
    }
}

fn validate_input_type(name: &str, value: &Value, expected: InputType) -> Result<()> {
    let ok = match expected {
        InputType::String => value.is_string(),
        InputType::Number => value.is_number(),
        InputType::Boolean => value.is_boolean(),
        InputType::Array => value.is_array(),
        InputType::Object => value.is_object(),
    };
    if ok {
        Ok(())
    } else {
        Err(OrchestratorError::Validation(format!(
            "input '{}' does not match declared type {:?}",
            name, expected
        )))
    }
}

fn validate_steps(steps: &[Step], seen: &mut std::collections::HashSet<String>) -> Result<()> {
    for step in steps {
        if !seen.insert(step.id.clone()) {
            return Err(OrchestratorError::Validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
        for child in step.kind.children() {
            validate_steps(child, seen)?;
        }
        if let StepKind::Merge(merge) = &step.kind {
            if merge.mode != MergeMode::Append && merge.match_field.is_none() {
                return Err(OrchestratorError::Validation(format!(
                    "merge step '{}' with mode {:?} requires matchField",
                    step.id, merge.mode
                )));
            }
        }
    }
    Ok(())
}

/// A step in the workflow tree: common attributes plus a kind-specific body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    /// Guard conditions; the step is skipped unless all evaluate true.
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn leaf(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            output: None,
            conditions: Vec::new(),
            retry: None,
            timeout_seconds: None,
            permissions: Vec::new(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Action(ActionStep),
    Workflow(WorkflowCallStep),
    If(IfStep),
    Switch(SwitchStep),
    ForEach(ForEachStep),
    While(WhileStep),
    Map(MapStep),
    Filter(FilterStep),
    Reduce(ReduceStep),
    Parallel(ParallelStep),
    TryCatch(TryCatchStep),
    Script(ScriptStep),
    Wait(WaitStep),
    Merge(MergeStep),
}

impl StepKind {
    /// Returns `true` for kinds invoked via the Action Executor (directly,
    /// or via a nested workflow run), `false` for control-flow kinds that
    /// recurse back into the dispatcher themselves.
    pub fn is_leaf(&self) -> bool {
        matches!(self, StepKind::Action(_) | StepKind::Workflow(_))
    }

    /// Child step lists owned by this kind, used for id-uniqueness
    /// validation and other tree walks. Does not include per-branch
    /// try/catch/finally distinction; callers needing that use the
    /// specific struct's fields.
    pub fn children(&self) -> Vec<&Vec<Step>> {
        match self {
            StepKind::Action(_) | StepKind::Workflow(_) => vec![],
            StepKind::If(s) => {
                let mut v = vec![&s.then];
                if let Some(e) = &s.r#else {
                    v.push(e);
                }
                v
            }
            StepKind::Switch(s) => {
                let mut v: Vec<&Vec<Step>> = s.cases.values().collect();
                if let Some(d) = &s.default {
                    v.push(d);
                }
                v
            }
            StepKind::ForEach(s) => vec![&s.steps],
            StepKind::While(s) => vec![&s.steps],
            StepKind::Map(_) | StepKind::Filter(_) | StepKind::Reduce(_) => vec![],
            StepKind::Parallel(s) => s.branches.iter().map(|b| &b.steps).collect(),
            StepKind::TryCatch(s) => {
                let mut v = vec![&s.r#try];
                if let Some(c) = &s.catch {
                    v.push(c);
                }
                if let Some(f) = &s.finally {
                    v.push(f);
                }
                v
            }
            StepKind::Script(_) | StepKind::Wait(_) => vec![],
            StepKind::Merge(_) => vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    /// Name of a tool bound in `Workflow::tools`, resolved by the action
    /// executor's adapter registry.
    pub action: String,
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCallStep {
    pub workflow_path: String,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfStep {
    pub condition: String,
    /// Aliased as `steps` in some authoring surfaces; the field name here
    /// is `then` for clarity between the two branches.
    #[serde(alias = "steps")]
    pub then: Vec<Step>,
    #[serde(default, alias = "else_")]
    pub r#else: Option<Vec<Step>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchStep {
    pub expression: String,
    #[serde(default)]
    pub cases: HashMap<String, Vec<Step>>,
    #[serde(default)]
    pub default: Option<Vec<Step>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    Stop,
    Continue,
}

impl Default for ErrorAction {
    fn default() -> Self {
        ErrorAction::Stop
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandling {
    #[serde(default)]
    pub action: ErrorAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForEachStep {
    pub items: String,
    pub item_variable: String,
    #[serde(default)]
    pub index_variable: Option<String>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub error_handling: ErrorHandling,
    /// When set and > 0, items are processed in batches of this size.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub pause_between_batches_ms: Option<u64>,
}

fn default_max_iterations() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhileStep {
    pub condition: String,
    pub steps: Vec<Step>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub error_handling: ErrorHandling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapStep {
    pub items: String,
    pub expression: String,
    pub item_variable: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterStep {
    pub items: String,
    pub condition: String,
    pub item_variable: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceStep {
    pub items: String,
    pub expression: String,
    pub item_variable: String,
    pub accumulator_variable: String,
    #[serde(default)]
    pub initial_value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelBranch {
    pub id: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Stop,
    Continue,
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Stop
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelStep {
    pub branches: Vec<ParallelBranch>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default)]
    pub on_error: OnError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryCatchStep {
    pub r#try: Vec<Step>,
    #[serde(default)]
    pub catch: Option<Vec<Step>>,
    #[serde(default)]
    pub finally: Option<Vec<Step>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStep {
    pub code: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// A field descriptor for `wait(mode = form)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WaitStep {
    Duration {
        /// A templated duration string, e.g. `"30s"`, `"{{ vars.delay }}"`.
        duration: String,
    },
    Webhook {
        /// Templated override of the default generated webhook path.
        #[serde(default)]
        path: Option<String>,
    },
    Form {
        fields: HashMap<String, FormField>,
        #[serde(default)]
        path: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    Append,
    Match,
    Diff,
    CombineByField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnConflict {
    KeepFirst,
    KeepLast,
}

impl Default for OnConflict {
    fn default() -> Self {
        OnConflict::KeepLast
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeStep {
    pub sources: Vec<String>,
    pub mode: MergeMode,
    #[serde(default)]
    pub match_field: Option<String>,
    #[serde(default)]
    pub on_conflict: OnConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Constant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff: BackoffStrategy,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_backoff() -> BackoffStrategy {
    BackoffStrategy::Exponential
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf(steps: Vec<Step>) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            version: "1.0".to_string(),
            description: None,
            inputs: vec![],
            tools: HashMap::new(),
            timeout_seconds: None,
            steps,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn rejects_duplicate_step_ids() {
        let steps = vec![
            Step::leaf("a", StepKind::Action(ActionStep { action: "log".into(), params: HashMap::new() })),
            Step::leaf("a", StepKind::Action(ActionStep { action: "log".into(), params: HashMap::new() })),
        ];
        let workflow = wf(steps);
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_nested_step_ids() {
        let inner = Step::leaf("dup", StepKind::Action(ActionStep { action: "log".into(), params: HashMap::new() }));
        let outer = Step::leaf(
            "dup",
            StepKind::If(IfStep {
                condition: "true".into(),
                then: vec![inner],
                r#else: None,
            }),
        );
        let workflow = wf(vec![outer]);
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn merge_requires_match_field_unless_append() {
        let step = Step::leaf(
            "m",
            StepKind::Merge(MergeStep {
                sources: vec!["{{ a }}".into()],
                mode: MergeMode::Diff,
                match_field: None,
                on_conflict: OnConflict::default(),
            }),
        );
        assert!(wf(vec![step]).validate().is_err());
    }

    #[test]
    fn required_input_without_default_fails() {
        let mut workflow = wf(vec![]);
        workflow.inputs.push(InputDeclaration {
            name: "name".into(),
            input_type: InputType::String,
            default: None,
            required: true,
            validation: None,
        });
        assert!(workflow.resolve_inputs(HashMap::new()).is_err());
    }

    #[test]
    fn default_input_value_is_applied() {
        let mut workflow = wf(vec![]);
        workflow.inputs.push(InputDeclaration {
            name: "name".into(),
            input_type: InputType::String,
            default: Some(Value::String("Ada".into())),
            required: false,
            validation: None,
        });
        let resolved = workflow.resolve_inputs(HashMap::new()).unwrap();
        assert_eq!(resolved["name"], Value::String("Ada".into()));
    }
}
