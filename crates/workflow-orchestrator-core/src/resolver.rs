// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The variable/template resolver: `resolveTemplates(value, context) -> value`.
//!
//! Built on `handlebars`. Resolution is pure (never mutates the context)
//! and never throws on an undefined path — it yields an empty string in
//! rendered text and `Value::Null` from dotted-path evaluation, treating
//! a missing key as undefined rather than an error.

use crate::context::ExecutionContext;
use crate::error::Result;
use handlebars::Handlebars;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Builds the layered lookup context handed to the template engine:
/// `{inputs, variables, stepMetadata, ...variables}` — the spread lets a
/// template reference a bound variable unqualified (`{{ x }}` as well as
/// `{{ variables.x }}`).
fn render_data(context: &ExecutionContext) -> Value {
    let variables = context.variables_flat();
    let mut root = Map::new();
    root.insert("inputs".to_string(), serde_json::to_value(context.inputs()).unwrap_or(Value::Null));
    root.insert(
        "variables".to_string(),
        Value::Object(variables.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
    );
    root.insert(
        "stepMetadata".to_string(),
        serde_json::to_value(context.step_metadata_snapshot()).unwrap_or(Value::Null),
    );
    for (k, v) in variables {
        root.entry(k).or_insert(v);
    }
    Value::Object(root)
}

/// Registers the small set of helpers the grammar exposes beyond raw
/// interpolation (`default`, `upper`, `lower`) alongside handlebars'
/// built-in `#if`/`#each` block helpers.
fn engine() -> Handlebars<'static> {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(false);
    hb.register_helper(
        "default",
        Box::new(
            |h: &handlebars::Helper,
             _: &Handlebars,
             _: &handlebars::Context,
             _: &mut handlebars::RenderContext,
             out: &mut dyn handlebars::Output|
             -> handlebars::HelperResult {
                let value = h.param(0).map(|p| p.value());
                let fallback = h.param(1).map(|p| p.value().render()).unwrap_or_default();
                let rendered = match value {
                    Some(Value::Null) | None => fallback,
                    Some(v) => v.render(),
                };
                out.write(&rendered)?;
                Ok(())
            },
        ),
    );
    hb.register_helper(
        "upper",
        Box::new(
            |h: &handlebars::Helper,
             _: &Handlebars,
             _: &handlebars::Context,
             _: &mut handlebars::RenderContext,
             out: &mut dyn handlebars::Output|
             -> handlebars::HelperResult {
                let s = h.param(0).map(|p| p.value().render()).unwrap_or_default();
                out.write(&s.to_uppercase())?;
                Ok(())
            },
        ),
    );
    hb.register_helper(
        "lower",
        Box::new(
            |h: &handlebars::Helper,
             _: &Handlebars,
             _: &handlebars::Context,
             _: &mut handlebars::RenderContext,
             out: &mut dyn handlebars::Output|
             -> handlebars::HelperResult {
                let s = h.param(0).map(|p| p.value().render()).unwrap_or_default();
                out.write(&s.to_lowercase())?;
                Ok(())
            },
        ),
    );
    hb
}

/// Recognizes a template string that consists solely of a single
/// `{{ path }}` interpolation (no surrounding text, no helpers/blocks),
/// in which case the whole string may evaluate to a non-string value.
fn as_single_path_template(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    let path = inner.trim();
    if path.is_empty() {
        return None;
    }
    let is_bare_path = path
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '[' || c == ']' || c == '-');
    if is_bare_path {
        Some(path)
    } else {
        None
    }
}

/// Resolves a dotted path (with optional `[n]` array indexing) against a
/// JSON value, tolerating missing intermediate keys and non-integer array
/// indices by returning `None` rather than panicking or erroring.
pub fn resolve_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root.clone();
    for raw_segment in split_path(path) {
        match raw_segment {
            PathSegment::Key(key) => match current {
                Value::Object(ref map) => current = map.get(&key)?.clone(),
                _ => return None,
            },
            PathSegment::Index(idx) => match current {
                Value::Array(ref arr) => current = arr.get(idx)?.clone(),
                _ => return None,
            },
            PathSegment::NonIntegerIndex => return None,
        }
    }
    Some(current)
}

enum PathSegment {
    Key(String),
    Index(usize),
    NonIntegerIndex,
}

fn split_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for dotted in path.split('.') {
        let mut rest = dotted;
        while let Some(open) = rest.find('[') {
            let (head, tail) = rest.split_at(open);
            if !head.is_empty() {
                segments.push(PathSegment::Key(head.to_string()));
            }
            let close = match tail.find(']') {
                Some(c) => c,
                None => {
                    segments.push(PathSegment::Key(tail.to_string()));
                    rest = "";
                    break;
                }
            };
            let index_str = &tail[1..close];
            match index_str.parse::<usize>() {
                Ok(idx) => segments.push(PathSegment::Index(idx)),
                Err(_) => segments.push(PathSegment::NonIntegerIndex),
            }
            rest = &tail[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(PathSegment::Key(rest.to_string()));
        }
    }
    segments
}

/// Evaluates a dotted path against the context's render data. Returns
/// `Value::Null` for an undefined path — dotted-path evaluation never
/// throws on a missing key.
pub fn resolve_path_in_context(context: &ExecutionContext, path: &str) -> Value {
    let data = render_data(context);
    resolve_path(&data, path).unwrap_or(Value::Null)
}

/// Walks `value` recursively; every string is passed through the template
/// engine against the context's layered lookup data. Mappings and
/// sequences are walked in place; everything else passes through
/// unchanged.
pub fn resolve_templates(value: &Value, context: &ExecutionContext) -> Result<Value> {
    let data = render_data(context);
    resolve_value(value, &data)
}

fn resolve_value(value: &Value, data: &Value) -> Result<Value> {
    match value {
        Value::String(s) => Ok(resolve_string(s, data)?),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(item, data)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, data)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, data: &Value) -> Result<Value> {
    if let Some(path) = as_single_path_template(s) {
        return Ok(resolve_path(data, path).unwrap_or(Value::Null));
    }
    if !s.contains("{{") {
        return Ok(Value::String(s.to_string()));
    }
    let hb = engine();
    let rendered = hb.render_template(s, data)?;
    Ok(Value::String(rendered))
}

/// Convenience wrapper resolving a single template string to a string,
/// used by executors that need a rendered `String` rather than a `Value`
/// (e.g. a condition's text, a switch's `expression`).
pub fn resolve_template_string(s: &str, context: &ExecutionContext) -> Result<String> {
    match resolve_templates(&Value::String(s.to_string()), context)? {
        Value::String(rendered) => Ok(rendered),
        other => Ok(value_to_display_string(&other)),
    }
}

pub fn value_to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Resolves `items`/`sources`-style string expressions to a `Vec<Value>`,
/// the sequence-producing half of the resolver contract used by
/// for-each/map/filter/reduce/merge.
pub fn resolve_sequence(expr: &str, context: &ExecutionContext) -> Result<Option<Vec<Value>>> {
    let resolved = resolve_templates(&Value::String(expr.to_string()), context)?;
    Ok(match resolved {
        Value::Array(items) => Some(items),
        _ => None,
    })
}

#[allow(dead_code)]
pub(crate) fn context_variables_for_test(context: &ExecutionContext) -> HashMap<String, Value> {
    context.variables_flat()
}
