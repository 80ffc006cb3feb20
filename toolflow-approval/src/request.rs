//! Approval request contract handed to rules, prompts, and observers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolflow_primitives::CallId;
use toolflow_tools::ToolContract;

const MAX_PARAMETER_PREVIEW: usize = 200;

/// Describes one tool call awaiting an approval decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    call_id: CallId,
    tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_description: Option<String>,
    #[serde(default)]
    parameters: Value,
}

impl ApprovalRequest {
    /// Creates a request for an arbitrary tool name.
    #[must_use]
    pub fn new(call_id: CallId, tool_name: impl Into<String>, parameters: Value) -> Self {
        Self {
            call_id,
            tool_name: tool_name.into(),
            category: None,
            tool_description: None,
            parameters,
        }
    }

    /// Creates a request carrying the name, category, and description of
    /// `contract`.
    #[must_use]
    pub fn from_contract(call_id: CallId, contract: &ToolContract, parameters: Value) -> Self {
        Self {
            call_id,
            tool_name: contract.name().to_owned(),
            category: contract.category().map(str::to_owned),
            tool_description: contract.description().map(str::to_owned),
            parameters,
        }
    }

    /// Sets the tool category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Returns the call identifier.
    #[must_use]
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Returns the tool name.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Returns the tool category, if known.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Returns the parameters the call will run with.
    #[must_use]
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Returns a human-readable description suitable for a confirmation prompt.
    #[must_use]
    pub fn description(&self) -> String {
        let mut text = format!("Run tool `{}`", self.tool_name);
        if let Some(category) = &self.category {
            text.push_str(&format!(" [{category}]"));
        }
        text.push_str(&format!(" for call `{}`", self.call_id));
        if let Some(description) = &self.tool_description {
            text.push_str(&format!(" ({description})"));
        }
        if !self.parameters.is_null() {
            text.push_str(" with parameters ");
            text.push_str(&preview(&self.parameters));
        }
        text
    }
}

fn preview(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.len() <= MAX_PARAMETER_PREVIEW {
        return rendered;
    }
    let mut cut = MAX_PARAMETER_PREVIEW;
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &rendered[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn description_mentions_tool_call_and_parameters() {
        let contract = ToolContract::new("write_file", "1.0.0")
            .unwrap()
            .with_category("mutation")
            .with_description("Writes a file to disk");
        let request = ApprovalRequest::from_contract(
            CallId::new("w1").unwrap(),
            &contract,
            json!({ "path": "README.md" }),
        );

        let text = request.description();
        assert!(text.contains("`write_file`"));
        assert!(text.contains("[mutation]"));
        assert!(text.contains("`w1`"));
        assert!(text.contains("README.md"));
    }

    #[test]
    fn long_parameters_are_truncated() {
        let request = ApprovalRequest::new(
            CallId::new("x").unwrap(),
            "bulk",
            json!({ "data": "é".repeat(400) }),
        );
        let text = request.description();
        assert!(text.ends_with('…'));
        assert!(text.len() < 400);
    }
}
