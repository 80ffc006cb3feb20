//! `${id}` placeholder substitution from upstream call outputs.
//!
//! A string that is exactly `${id}` or `${id.path}` is replaced by the
//! referenced JSON value. Placeholders inside longer strings are interpolated
//! as text. Only identifiers that belong to the batch are treated as
//! placeholders; anything else is left verbatim.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use thiserror::Error;
use toolflow_primitives::CallId;

/// Reasons a placeholder cannot be resolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubstitutionError {
    /// The referenced call is in the batch but is not a completed dependency.
    #[error("`${{{reference}}}` refers to `{call_id}`, which is not a completed dependency")]
    NotADependency {
        /// Placeholder body.
        reference: String,
        /// Referenced call.
        call_id: String,
    },
    /// The path does not exist in the referenced output.
    #[error("`${{{reference}}}` does not match the output of `{call_id}`")]
    PathNotFound {
        /// Placeholder body.
        reference: String,
        /// Referenced call.
        call_id: String,
    },
}

/// Replaces placeholders in `value`.
///
/// `batch` holds every call id in the batch; `outputs` holds the outputs the
/// current call may read, normally those of its completed dependencies.
///
/// # Errors
///
/// Returns a [`SubstitutionError`] for the first placeholder that names a
/// batch call missing from `outputs` or a path absent from its output.
pub fn substitute(
    value: &Value,
    batch: &HashSet<CallId>,
    outputs: &HashMap<CallId, Value>,
) -> Result<Value, SubstitutionError> {
    match value {
        Value::String(text) => substitute_str(text, batch, outputs),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, batch, outputs))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| Ok((key.clone(), substitute(item, batch, outputs)?)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn substitute_str(
    text: &str,
    batch: &HashSet<CallId>,
    outputs: &HashMap<CallId, Value>,
) -> Result<Value, SubstitutionError> {
    // Whole-string placeholders keep the referenced value's JSON type.
    if let Some(body) = text.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        if !body.contains('}') {
            if let Some(value) = lookup(body, batch, outputs)? {
                return Ok(value);
            }
        }
    }

    let mut rendered = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let body = &rest[start + 2..start + 2 + len];
        rendered.push_str(&rest[..start]);
        match lookup(body, batch, outputs)? {
            Some(Value::String(inner)) => rendered.push_str(&inner),
            Some(other) => rendered.push_str(&other.to_string()),
            None => rendered.push_str(&rest[start..start + 3 + len]),
        }
        rest = &rest[start + 3 + len..];
    }
    rendered.push_str(rest);
    Ok(Value::String(rendered))
}

fn lookup(
    body: &str,
    batch: &HashSet<CallId>,
    outputs: &HashMap<CallId, Value>,
) -> Result<Option<Value>, SubstitutionError> {
    let (head, path) = match body.split_once('.') {
        Some((head, path)) => (head, Some(path)),
        None => (body, None),
    };
    let Ok(call_id) = CallId::new(head) else {
        return Ok(None);
    };
    if !batch.contains(&call_id) {
        return Ok(None);
    }
    let Some(output) = outputs.get(&call_id) else {
        return Err(SubstitutionError::NotADependency {
            reference: body.to_owned(),
            call_id: head.to_owned(),
        });
    };

    let mut current = output;
    for segment in path.into_iter().flat_map(|path| path.split('.')) {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
            _ => None,
        };
        current = next.ok_or_else(|| SubstitutionError::PathNotFound {
            reference: body.to_owned(),
            call_id: head.to_owned(),
        })?;
    }
    Ok(Some(current.clone()))
}
