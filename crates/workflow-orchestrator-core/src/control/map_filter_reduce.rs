// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `map`/`filter`/`reduce`: pure data-transformation kinds with no
//! nested `steps` — each binds its loop variable(s) in a scoped frame and
//! evaluates a single expression or condition per item.

use crate::condition;
use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, Result};
use crate::resolver;
use crate::workflow::{FilterStep, MapStep, ReduceStep};
use serde_json::Value;
use std::collections::HashMap;

pub fn execute_map(step: &MapStep, context: &ExecutionContext) -> Result<Value> {
    let items = resolver::resolve_sequence(&step.items, context)?
        .ok_or_else(|| OrchestratorError::Condition(format!("'{}' did not resolve to a sequence", step.items)))?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let guard = context.push_scope(HashMap::from([(step.item_variable.clone(), item)]));
        let mapped = resolver::resolve_template_string(&step.expression, context).map(|s| to_value(&s));
        guard.release();
        out.push(mapped?);
    }
    Ok(Value::Array(out))
}

pub fn execute_filter(step: &FilterStep, context: &ExecutionContext) -> Result<Value> {
    let items = resolver::resolve_sequence(&step.items, context)?
        .ok_or_else(|| OrchestratorError::Condition(format!("'{}' did not resolve to a sequence", step.items)))?;

    let mut out = Vec::new();
    for item in items {
        let guard = context.push_scope(HashMap::from([(step.item_variable.clone(), item.clone())]));
        let keep = condition::evaluate_condition(&step.condition, context);
        guard.release();
        if keep? {
            out.push(item);
        }
    }
    Ok(Value::Array(out))
}

pub fn execute_reduce(step: &ReduceStep, context: &ExecutionContext) -> Result<Value> {
    let items = resolver::resolve_sequence(&step.items, context)?
        .ok_or_else(|| OrchestratorError::Condition(format!("'{}' did not resolve to a sequence", step.items)))?;

    let mut accumulator = step.initial_value.clone();
    for item in items {
        let guard = context.push_scope(HashMap::from([
            (step.item_variable.clone(), item),
            (step.accumulator_variable.clone(), accumulator.clone()),
        ]));
        let next = resolver::resolve_template_string(&step.expression, context).map(|s| to_value(&s));
        guard.release();
        accumulator = next?;
    }
    Ok(accumulator)
}

fn to_value(rendered: &str) -> Value {
    serde_json::from_str(rendered.trim()).unwrap_or_else(|_| Value::String(rendered.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4(), "wf", Default::default())
    }

    #[test]
    fn map_projects_each_item_through_the_expression() {
        let context = ctx();
        context.set_variable("items", json!([1, 2, 3]));
        let step = MapStep { items: "{{ items }}".into(), expression: "{{ n }}".into(), item_variable: "n".into() };
        let output = execute_map(&step, &context).unwrap();
        assert_eq!(output, json!([1, 2, 3]));
    }

    #[test]
    fn filter_keeps_items_matching_condition() {
        let context = ctx();
        context.set_variable("items", json!([1, 2, 3, 4]));
        let step = FilterStep { items: "{{ items }}".into(), condition: "n > 2".into(), item_variable: "n".into() };
        let output = execute_filter(&step, &context).unwrap();
        assert_eq!(output, json!([3, 4]));
    }

    #[test]
    fn reduce_threads_accumulator_through_each_item() {
        let context = ctx();
        context.set_variable("items", json!([1, 2, 3]));
        let step = ReduceStep {
            items: "{{ items }}".into(),
            expression: "{{ acc }}".into(),
            item_variable: "n".into(),
            accumulator_variable: "acc".into(),
            initial_value: json!(0),
        };
        let output = execute_reduce(&step, &context).unwrap();
        assert_eq!(output, json!(0));
    }

    #[test]
    fn map_loop_variable_does_not_leak_after_completion() {
        let context = ctx();
        context.set_variable("items", json!([1]));
        let step = MapStep { items: "{{ items }}".into(), expression: "{{ n }}".into(), item_variable: "n".into() };
        execute_map(&step, &context).unwrap();
        assert_eq!(context.get_variable("n"), None);
    }
}
