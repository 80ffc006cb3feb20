//! Turns a raw call batch into an execution plan.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use toolflow_primitives::{CallId, ToolCall};
use toolflow_tools::ToolProvider;
use tracing::debug;

use crate::graph::DependencyGraph;
use crate::{EngineError, EngineResult};

/// Immutable plan derived from one batch.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    sequential: Vec<CallId>,
    levels: Vec<Vec<CallId>>,
    max_parallelism: usize,
    #[serde(skip)]
    dependencies: HashMap<CallId, BTreeSet<CallId>>,
}

impl ExecutionPlan {
    /// Returns the calls in a valid topological order.
    #[must_use]
    pub fn sequential(&self) -> &[CallId] {
        &self.sequential
    }

    /// Returns the levels, each executable concurrently.
    #[must_use]
    pub fn levels(&self) -> &[Vec<CallId>] {
        &self.levels
    }

    /// Returns the size of the largest level.
    #[must_use]
    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// Returns the effective dependencies of `id`, explicit and inferred.
    #[must_use]
    pub fn dependencies_of(&self, id: &CallId) -> Option<&BTreeSet<CallId>> {
        self.dependencies.get(id)
    }

    /// Returns the number of planned calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sequential.len()
    }

    /// Returns true when the plan contains no calls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequential.is_empty()
    }
}

/// Builds execution plans using tool contracts from a [`ToolProvider`].
#[derive(Clone)]
pub struct DependencyResolver {
    tools: Arc<dyn ToolProvider>,
}

impl std::fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver").finish_non_exhaustive()
    }
}

impl DependencyResolver {
    /// Creates a resolver backed by `tools`.
    #[must_use]
    pub fn new(tools: Arc<dyn ToolProvider>) -> Self {
        Self { tools }
    }

    /// Validates `calls` and computes their execution plan.
    ///
    /// Explicit `depends_on` edges are unioned with the prerequisites declared
    /// by each tool contract; a prerequisite tool name resolves to the first
    /// other call in the batch using that tool and is ignored when no such
    /// call exists.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateCallId`],
    /// [`EngineError::UnknownDependency`], [`EngineError::UnknownTool`], or
    /// [`EngineError::CircularDependency`]. No call is executed in any case.
    pub fn resolve(&self, calls: &[ToolCall]) -> EngineResult<ExecutionPlan> {
        let mut ids = HashSet::with_capacity(calls.len());
        for call in calls {
            if !ids.insert(call.id()) {
                return Err(EngineError::DuplicateCallId {
                    call_id: call.id().clone(),
                });
            }
        }

        let mut first_by_tool: HashMap<&str, &CallId> = HashMap::new();
        for call in calls {
            first_by_tool.entry(call.tool_name()).or_insert(call.id());
        }

        let mut graph = DependencyGraph::new();
        let mut dependencies = HashMap::with_capacity(calls.len());
        for call in calls {
            if let Some(missing) = call.depends_on().iter().find(|dep| !ids.contains(dep)) {
                return Err(EngineError::UnknownDependency {
                    call_id: call.id().clone(),
                    dependency: missing.clone(),
                });
            }

            let Some(handle) = self.tools.get(call.tool_name()) else {
                return Err(EngineError::UnknownTool {
                    call_id: call.id().clone(),
                    tool_name: call.tool_name().to_owned(),
                });
            };

            let mut deps = call.depends_on().clone();
            for prerequisite in handle.contract().prerequisites() {
                match first_by_tool.get(prerequisite.as_str()) {
                    Some(&provider) if provider != call.id() => {
                        if deps.insert(provider.clone()) {
                            debug!(
                                call_id = %call.id(),
                                prerequisite = prerequisite.as_str(),
                                inferred = %provider,
                                "inferred prerequisite dependency"
                            );
                        }
                    }
                    _ => {}
                }
            }

            graph.add_node(call.id().clone(), deps.iter().cloned());
            dependencies.insert(call.id().clone(), deps);
        }

        let levels = graph.execution_levels()?;
        let sequential = levels.iter().flatten().cloned().collect();
        let max_parallelism = levels.iter().map(Vec::len).max().unwrap_or(0);
        debug!(calls = calls.len(), levels = levels.len(), max_parallelism, "execution plan built");

        Ok(ExecutionPlan {
            sequential,
            levels,
            max_parallelism,
            dependencies,
        })
    }
}
