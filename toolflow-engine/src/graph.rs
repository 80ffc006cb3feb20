//! Dependency graph over call identifiers.

use std::collections::{BTreeSet, HashMap};

use toolflow_primitives::CallId;

use crate::{EngineError, EngineResult};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Directed graph where an edge means "must complete before".
///
/// Nodes keep their insertion order, which is also the order calls appear in
/// within each execution level.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    ids: Vec<CallId>,
    index: HashMap<CallId, usize>,
    dependencies: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` depending on `deps`.
    ///
    /// Adding an existing node merges the dependency sets. Dependencies that
    /// are not yet nodes are added as nodes without dependencies of their own.
    pub fn add_node<I>(&mut self, id: CallId, deps: I)
    where
        I: IntoIterator<Item = CallId>,
    {
        let node = self.intern(id);
        for dep in deps {
            let dep = self.intern(dep);
            self.dependencies[node].insert(dep);
        }
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true when the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns true when `id` is a node.
    #[must_use]
    pub fn contains(&self, id: &CallId) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the direct dependencies of `id` in insertion order.
    #[must_use]
    pub fn dependencies(&self, id: &CallId) -> Vec<&CallId> {
        self.index
            .get(id)
            .map(|&node| self.dependencies[node].iter().map(|&dep| &self.ids[dep]).collect())
            .unwrap_or_default()
    }

    /// Finds a cycle using a three-colour depth-first search.
    ///
    /// The returned path lists each node followed by the node it depends on;
    /// the last element depends on the first.
    #[must_use]
    pub fn detect_cycle(&self) -> Option<Vec<CallId>> {
        let mut marks = vec![Mark::Unvisited; self.ids.len()];
        let mut path = Vec::new();
        for start in 0..self.ids.len() {
            if marks[start] == Mark::Unvisited {
                if let Some(cycle) = self.visit(start, &mut marks, &mut path) {
                    return Some(cycle.into_iter().map(|node| self.ids[node].clone()).collect());
                }
            }
        }
        None
    }

    fn visit(&self, node: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<usize>> {
        marks[node] = Mark::InProgress;
        path.push(node);
        for &dep in &self.dependencies[node] {
            match marks[dep] {
                Mark::InProgress => {
                    let start = path.iter().position(|&entry| entry == dep).unwrap_or(0);
                    return Some(path[start..].to_vec());
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(dep, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        path.pop();
        marks[node] = Mark::Done;
        None
    }

    /// Groups nodes into levels whose dependencies all lie in earlier levels.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CircularDependency`] when the graph is cyclic.
    pub fn execution_levels(&self) -> EngineResult<Vec<Vec<CallId>>> {
        let count = self.ids.len();
        let mut pending: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (node, deps) in self.dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }

        let mut ready: Vec<usize> = (0..count).filter(|&node| pending[node] == 0).collect();
        let mut levels = Vec::new();
        let mut placed = 0;
        while !ready.is_empty() {
            ready.sort_unstable();
            let mut next = Vec::new();
            for &node in &ready {
                for &dependent in &dependents[node] {
                    pending[dependent] -= 1;
                    if pending[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            placed += ready.len();
            levels.push(ready.iter().map(|&node| self.ids[node].clone()).collect());
            ready = next;
        }

        if placed < count {
            let cycle = self.detect_cycle().unwrap_or_default();
            return Err(EngineError::CircularDependency { cycle });
        }
        Ok(levels)
    }

    /// Returns every node after all of its dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CircularDependency`] when the graph is cyclic.
    pub fn topological_sort(&self) -> EngineResult<Vec<CallId>> {
        Ok(self.execution_levels()?.into_iter().flatten().collect())
    }

    fn intern(&mut self, id: CallId) -> usize {
        if let Some(&node) = self.index.get(&id) {
            return node;
        }
        let node = self.ids.len();
        self.index.insert(id.clone(), node);
        self.ids.push(id);
        self.dependencies.push(BTreeSet::new());
        node
    }
}
