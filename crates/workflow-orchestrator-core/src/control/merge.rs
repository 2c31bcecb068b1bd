// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `merge`: combine the arrays produced by `sources` according to
//! `mode`, resolving key conflicts with `on_conflict`.

use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, Result};
use crate::resolver;
use crate::workflow::{MergeMode, MergeStep, OnConflict};
use serde_json::{Map, Value};

pub fn execute(step: &MergeStep, context: &ExecutionContext) -> Result<Value> {
    let mut sources = Vec::with_capacity(step.sources.len());
    for source in &step.sources {
        let items = resolver::resolve_sequence(source, context)?
            .ok_or_else(|| OrchestratorError::Condition(format!("merge source '{}' did not resolve to a sequence", source)))?;
        sources.push(items);
    }

    match step.mode {
        MergeMode::Append => Ok(Value::Array(sources.into_iter().flatten().collect())),
        MergeMode::Diff => {
            let field = step
                .match_field
                .as_ref()
                .ok_or_else(|| OrchestratorError::Condition("merge mode requires matchField".into()))?;
            Ok(diff_by_field(&sources, field))
        }
        MergeMode::Match | MergeMode::CombineByField => {
            let field = step
                .match_field
                .as_ref()
                .ok_or_else(|| OrchestratorError::Condition("merge mode requires matchField".into()))?;
            Ok(combine_by_field(&sources, field, step.on_conflict, step.mode))
        }
    }
}

/// Keeps elements of the first source whose `field` value is absent from
/// every other source's projected values — a field-keyed exclusion, not a
/// whole-value comparison, so differently-shaped records sharing a key
/// still match.
fn diff_by_field(sources: &[Vec<Value>], field: &str) -> Value {
    let Some((first, rest)) = sources.split_first() else {
        return Value::Array(Vec::new());
    };

    let excluded_keys: std::collections::HashSet<String> = rest
        .iter()
        .flatten()
        .filter_map(|item| item.as_object())
        .filter_map(|obj| obj.get(field))
        .map(resolver::value_to_display_string)
        .collect();

    Value::Array(
        first
            .iter()
            .filter(|item| match item.as_object().and_then(|obj| obj.get(field)) {
                Some(key) => !excluded_keys.contains(&resolver::value_to_display_string(key)),
                None => true,
            })
            .cloned()
            .collect(),
    )
}

/// Joins every source on `field`, keeping one record per distinct key.
/// `match` keeps only the joined record; `combine_by_field` merges all
/// objects sharing a key into one, with `on_conflict` deciding which
/// source wins when both set the same non-key field.
fn combine_by_field(sources: &[Vec<Value>], field: &str, on_conflict: OnConflict, mode: MergeMode) -> Value {
    let mut order: Vec<Value> = Vec::new();
    let mut by_key: std::collections::HashMap<String, Map<String, Value>> = std::collections::HashMap::new();
    let mut seen_in: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for items in sources {
        for item in items {
            let Some(obj) = item.as_object() else { continue };
            let Some(key) = obj.get(field).map(|v| resolver::value_to_display_string(v)) else { continue };

            let entry = by_key.entry(key.clone()).or_insert_with(|| {
                order.push(Value::String(key.clone()));
                Map::new()
            });
            *seen_in.entry(key.clone()).or_insert(0) += 1;

            for (k, v) in obj {
                match entry.get(k) {
                    None => {
                        entry.insert(k.clone(), v.clone());
                    }
                    Some(_) if on_conflict == OnConflict::KeepLast => {
                        entry.insert(k.clone(), v.clone());
                    }
                    Some(_) => {}
                }
            }
        }
    }

    let required_sources = sources.len();
    let mut results = Vec::new();
    for key in order {
        let key_str = key.as_str().unwrap_or_default();
        let present_in = seen_in.get(key_str).copied().unwrap_or(0);
        if mode == MergeMode::Match && present_in < required_sources {
            continue;
        }
        if let Some(obj) = by_key.remove(key_str) {
            results.push(Value::Object(obj));
        }
    }
    Value::Array(results)
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
    fn append_concatenates_all_sources_in_order() {
        let context = ctx();
        context.set_variable("a", json!([1, 2]));
        context.set_variable("b", json!([3]));
        let step = MergeStep { sources: vec!["{{ a }}".into(), "{{ b }}".into()], mode: MergeMode::Append, match_field: None, on_conflict: OnConflict::default() };
        assert_eq!(execute(&step, &context).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn combine_by_field_keeps_last_writer_on_conflict() {
        let context = ctx();
        context.set_variable("a", json!([{"id": 1, "name": "first"}]));
        context.set_variable("b", json!([{"id": 1, "name": "second"}]));
        let step = MergeStep {
            sources: vec!["{{ a }}".into(), "{{ b }}".into()],
            mode: MergeMode::CombineByField,
            match_field: Some("id".into()),
            on_conflict: OnConflict::KeepLast,
        };
        let output = execute(&step, &context).unwrap();
        assert_eq!(output, json!([{"id": 1, "name": "second"}]));
    }

    #[test]
    fn match_mode_drops_keys_absent_from_any_source() {
        let context = ctx();
        context.set_variable("a", json!([{"id": 1}, {"id": 2}]));
        context.set_variable("b", json!([{"id": 1}]));
        let step = MergeStep {
            sources: vec!["{{ a }}".into(), "{{ b }}".into()],
            mode: MergeMode::Match,
            match_field: Some("id".into()),
            on_conflict: OnConflict::default(),
        };
        let output = execute(&step, &context).unwrap();
        assert_eq!(output, json!([{"id": 1}]));
    }

    #[test]
    fn diff_keeps_first_source_items_whose_match_field_is_absent_from_the_rest() {
        let context = ctx();
        context.set_variable("a", json!([{"id": 1}, {"id": 2}, {"id": 3}]));
        context.set_variable("b", json!([{"id": 2}]));
        let step = MergeStep {
            sources: vec!["{{ a }}".into(), "{{ b }}".into()],
            mode: MergeMode::Diff,
            match_field: Some("id".into()),
            on_conflict: OnConflict::default(),
        };
        let output = execute(&step, &context).unwrap();
        assert_eq!(output, json!([{"id": 1}, {"id": 3}]));
    }

    #[test]
    fn diff_without_match_field_fails() {
        let context = ctx();
        context.set_variable("a", json!([{"id": 1}]));
        context.set_variable("b", json!([{"id": 1}]));
        let step = MergeStep { sources: vec!["{{ a }}".into(), "{{ b }}".into()], mode: MergeMode::Diff, match_field: None, on_conflict: OnConflict::default() };
        assert!(execute(&step, &context).is_err());
    }
}
