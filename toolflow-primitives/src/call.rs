//! Tool call descriptors submitted to the orchestrator.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CallId, Error, Result};

const MAX_TOOL_NAME_LEN: usize = 128;

/// A single named operation requested by an upstream planner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    id: CallId,
    tool_name: String,
    #[serde(default)]
    parameters: Value,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    depends_on: BTreeSet<CallId>,
}

impl ToolCall {
    /// Starts building a [`ToolCall`] for the supplied identifier and tool.
    #[must_use]
    pub fn builder(id: CallId, tool_name: impl Into<String>) -> ToolCallBuilder {
        ToolCallBuilder {
            id,
            tool_name: tool_name.into(),
            parameters: Value::Null,
            depends_on: BTreeSet::new(),
        }
    }

    /// Convenience constructor for calls without explicit dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCallId`] or [`Error::InvalidCall`] when the
    /// identifier or tool name fails validation.
    pub fn new(id: &str, tool_name: &str, parameters: Value) -> Result<Self> {
        Self::builder(CallId::new(id)?, tool_name)
            .parameters(parameters)
            .build()
    }

    /// Returns the call identifier.
    #[must_use]
    pub fn id(&self) -> &CallId {
        &self.id
    }

    /// Returns the name of the tool to invoke.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Returns the opaque parameter payload.
    #[must_use]
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Returns the explicitly declared dependencies.
    #[must_use]
    pub fn depends_on(&self) -> &BTreeSet<CallId> {
        &self.depends_on
    }

    /// Returns a copy of this call carrying different parameters.
    #[must_use]
    pub fn with_parameters(&self, parameters: Value) -> Self {
        Self {
            parameters,
            ..self.clone()
        }
    }
}

/// Builder for [`ToolCall`].
#[derive(Debug)]
pub struct ToolCallBuilder {
    id: CallId,
    tool_name: String,
    parameters: Value,
    depends_on: BTreeSet<CallId>,
}

impl ToolCallBuilder {
    /// Sets the parameter payload.
    #[must_use]
    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Adds an explicit dependency on another call in the same batch.
    #[must_use]
    pub fn depends_on(mut self, id: CallId) -> Self {
        self.depends_on.insert(id);
        self
    }

    /// Adds a dependency by raw identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCallId`] when the identifier fails validation.
    pub fn depends_on_id(self, id: &str) -> Result<Self> {
        Ok(self.depends_on(CallId::new(id)?))
    }

    /// Finalises the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCall`] if the tool name is empty or too long, or
    /// if the call lists itself as a dependency.
    pub fn build(self) -> Result<ToolCall> {
        if self.tool_name.trim().is_empty() {
            return Err(Error::InvalidCall {
                reason: "tool name cannot be empty".into(),
            });
        }
        if self.tool_name.len() > MAX_TOOL_NAME_LEN {
            return Err(Error::InvalidCall {
                reason: format!("tool name length must be <= {MAX_TOOL_NAME_LEN}"),
            });
        }
        if self.depends_on.contains(&self.id) {
            return Err(Error::InvalidCall {
                reason: format!("call `{}` cannot depend on itself", self.id),
            });
        }

        Ok(ToolCall {
            id: self.id,
            tool_name: self.tool_name,
            parameters: self.parameters,
            depends_on: self.depends_on,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_call_with_dependencies() {
        let call = ToolCall::builder(CallId::new("b").unwrap(), "read_file")
            .parameters(json!({ "path": "${a.files.0}" }))
            .depends_on_id("a")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(call.tool_name(), "read_file");
        assert_eq!(call.depends_on().len(), 1);
        assert!(call.depends_on().contains(&CallId::new("a").unwrap()));
    }

    #[test]
    fn self_dependency_is_rejected() {
        let err = ToolCall::builder(CallId::new("a").unwrap(), "noop")
            .depends_on_id("a")
            .unwrap()
            .build()
            .expect_err("self dependency");
        assert!(matches!(err, Error::InvalidCall { .. }));
    }

    #[test]
    fn tool_name_is_required() {
        let err = ToolCall::new("a", "  ", Value::Null).expect_err("empty tool");
        assert!(matches!(err, Error::InvalidCall { .. }));
    }

    #[test]
    fn deserializes_from_planner_payload() {
        let call: ToolCall = serde_json::from_value(json!({
            "id": "c",
            "tool_name": "search_code",
            "parameters": { "query": "fn main" },
            "depends_on": ["a", "b"]
        }))
        .unwrap();

        assert_eq!(call.id().as_str(), "c");
        assert_eq!(call.depends_on().len(), 2);
    }
}
