//! Runtime registry for tool contracts and executors.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use toolflow_primitives::ErrorCategory;
use tracing::debug;

use crate::classify::classify_message;

/// Result alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Capability record describing how the orchestrator may treat a tool.
///
/// The engine only reads contracts; it never mutates them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolContract {
    name: String,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    prerequisites: Vec<String>,
    #[serde(default)]
    cacheable: bool,
    #[serde(default)]
    requires_approval: bool,
    #[serde(default)]
    retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

impl ToolContract {
    /// Creates a contract for the supplied tool name and version.
    ///
    /// All capability flags start disabled.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidContract`] if either field is empty.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> ToolResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ToolError::InvalidContract {
                reason: "tool name cannot be empty".into(),
            });
        }

        let version = version.into();
        if version.trim().is_empty() {
            return Err(ToolError::InvalidContract {
                reason: "tool version cannot be empty".into(),
            });
        }

        Ok(Self {
            name,
            version,
            description: None,
            category: None,
            prerequisites: Vec::new(),
            cacheable: false,
            requires_approval: false,
            retryable: false,
            timeout_ms: None,
        })
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the tool category used by approval rules (e.g. `read`, `mutation`).
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Declares tools that must run before this one when present in a batch.
    #[must_use]
    pub fn with_prerequisites<I, S>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites = prerequisites.into_iter().map(Into::into).collect();
        self
    }

    /// Marks results of this tool as safe to memoize.
    #[must_use]
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Requires human confirmation before the tool runs.
    #[must_use]
    pub fn requires_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    /// Allows automatic retries on transient failures.
    ///
    /// Mutation tools that are not idempotent should leave this disabled.
    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Bounds a single invocation attempt.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the semantic version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the optional category label.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Returns the declared prerequisite tool names.
    #[must_use]
    pub fn prerequisites(&self) -> &[String] {
        &self.prerequisites
    }

    /// Returns `true` when results may be cached.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Returns `true` when the tool needs approval before running.
    #[must_use]
    pub fn needs_approval(&self) -> bool {
        self.requires_approval
    }

    /// Returns `true` when transient failures may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Returns the per-attempt timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Trait implemented by tool executors.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Invokes the tool with the given JSON input, returning JSON output.
    async fn invoke(&self, input: Value) -> ToolResult<Value>;
}

#[async_trait]
impl<F, Fut> Tool for F
where
    F: Send + Sync + Fn(Value) -> Fut,
    Fut: Future<Output = ToolResult<Value>> + Send,
{
    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        (self)(input).await
    }
}

/// Handle pairing a contract with its executor.
#[derive(Clone)]
pub struct ToolHandle {
    contract: Arc<ToolContract>,
    executor: Arc<dyn Tool>,
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle")
            .field("contract", &self.contract)
            .finish_non_exhaustive()
    }
}

impl ToolHandle {
    /// Creates a handle from a contract and an executor.
    #[must_use]
    pub fn new<T>(contract: ToolContract, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        Self {
            contract: Arc::new(contract),
            executor: Arc::new(tool),
        }
    }

    /// Returns the associated contract.
    #[must_use]
    pub fn contract(&self) -> &ToolContract {
        &self.contract
    }

    /// Executes the underlying tool implementation.
    ///
    /// # Errors
    ///
    /// Propagates any [`ToolError`] returned by the implementation.
    pub async fn invoke(&self, input: Value) -> ToolResult<Value> {
        self.executor.invoke(input).await
    }
}

/// Lookup seam through which the orchestrator resolves tool names.
pub trait ToolProvider: Send + Sync {
    /// Returns the handle registered under `name`, if any.
    fn get(&self, name: &str) -> Option<ToolHandle>;
}

/// In-memory registry that stores tool implementations keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<HashMap<String, ToolHandle>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = inner.keys().cloned().collect();
        names.sort();
        f.debug_struct("ToolRegistry")
            .field("registered", &names)
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool implementation under its contract name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::DuplicateTool`] if the name is already present.
    pub fn register_tool<T>(&self, contract: ToolContract, tool: T) -> ToolResult<()>
    where
        T: Tool + 'static,
    {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let name = contract.name().to_owned();
        if inner.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }

        debug!(tool = %name, version = contract.version(), "tool registered");
        inner.insert(name, ToolHandle::new(contract, tool));
        Ok(())
    }

    /// Returns the contract registered under `name`.
    #[must_use]
    pub fn contract(&self, name: &str) -> Option<ToolContract> {
        ToolProvider::get(self, name).map(|handle| handle.contract().clone())
    }

    /// Invokes a registered tool directly, bypassing orchestration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] when the tool is not found or
    /// propagates the failure returned by the implementation.
    pub async fn invoke(&self, name: &str, input: Value) -> ToolResult<Value> {
        let handle = ToolProvider::get(self, name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_owned(),
        })?;
        handle.invoke(input).await
    }

    /// Lists the contracts of all registered tools, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<ToolContract> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut contracts: Vec<_> = inner
            .values()
            .map(|handle| handle.contract().clone())
            .collect();
        contracts.sort_by(|a, b| a.name().cmp(b.name()));
        contracts
    }
}

impl ToolProvider for ToolRegistry {
    fn get(&self, name: &str) -> Option<ToolHandle> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.get(name).cloned()
    }
}

/// Errors produced by tool registration and invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool contract failed validation.
    #[error("invalid tool contract: {reason}")]
    InvalidContract {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool name collided with an existing registration.
    #[error("tool `{name}` is already registered")]
    DuplicateTool {
        /// Name of the offending tool.
        name: String,
    },

    /// Requested tool does not exist.
    #[error("tool `{name}` is not registered")]
    UnknownTool {
        /// Name of the missing tool.
        name: String,
    },

    /// Tool execution failed.
    #[error("tool execution failed ({category}): {reason}")]
    Execution {
        /// Failure category reported or inferred for the error.
        category: ErrorCategory,
        /// Human-readable error returned by the tool implementation.
        reason: String,
    },
}

impl ToolError {
    /// Creates an execution error, inferring the category from the message.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::Execution {
            category: classify_message(&reason),
            reason,
        }
    }

    /// Creates an execution error with an explicit category.
    #[must_use]
    pub fn categorized(category: ErrorCategory, reason: impl Into<String>) -> Self {
        Self::Execution {
            category,
            reason: reason.into(),
        }
    }

    /// Returns the failure category for this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidContract { .. } => ErrorCategory::Validation,
            Self::DuplicateTool { .. } => ErrorCategory::Unknown,
            Self::UnknownTool { .. } => ErrorCategory::NotFound,
            Self::Execution { category, .. } => *category,
        }
    }

    /// Returns the bare failure message without the category prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Execution { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}
