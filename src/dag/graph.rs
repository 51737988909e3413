// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::dag::operation::{Operation, OperationOptions};
use crate::dag::topology;
use crate::errors::{OpgraphError, Result};

/// Stable identifier of an operation inside its [`OperationGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(usize);

impl OperationId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Symmetric dependency/consumer adjacency.
///
/// Every edge is inserted through [`Adjacency::add_edge`], which updates both
/// maps, so `b ∈ dependencies(a) ⇔ a ∈ consumers(b)` always holds.
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    dependencies: BTreeMap<OperationId, BTreeSet<OperationId>>,
    consumers: BTreeMap<OperationId, BTreeSet<OperationId>>,
}

impl Adjacency {
    pub fn insert_node(&mut self, id: OperationId) {
        self.dependencies.entry(id).or_default();
        self.consumers.entry(id).or_default();
    }

    pub fn contains(&self, id: OperationId) -> bool {
        self.dependencies.contains_key(&id)
    }

    /// Record that `consumer` depends on `dependency`.
    pub fn add_edge(&mut self, consumer: OperationId, dependency: OperationId) {
        self.insert_node(consumer);
        self.insert_node(dependency);
        self.dependencies.entry(consumer).or_default().insert(dependency);
        self.consumers.entry(dependency).or_default().insert(consumer);
    }

    /// Returns `true` if the edge existed.
    pub fn remove_edge(&mut self, consumer: OperationId, dependency: OperationId) -> bool {
        let removed = self
            .dependencies
            .get_mut(&consumer)
            .is_some_and(|deps| deps.remove(&dependency));
        if let Some(consumers) = self.consumers.get_mut(&dependency) {
            consumers.remove(&consumer);
        }
        removed
    }

    pub fn nodes(&self) -> impl Iterator<Item = OperationId> + '_ {
        self.dependencies.keys().copied()
    }

    pub fn dependencies_of(&self, id: OperationId) -> impl Iterator<Item = OperationId> + '_ {
        self.dependencies.get(&id).into_iter().flatten().copied()
    }

    pub fn consumers_of(&self, id: OperationId) -> impl Iterator<Item = OperationId> + '_ {
        self.consumers.get(&id).into_iter().flatten().copied()
    }
}

/// Arena of operations plus their edges.
///
/// Operations are shared (`Arc`) with any execution manager built over the
/// graph, so run state written during a pass is visible through [`get`](Self::get).
#[derive(Debug, Default)]
pub struct OperationGraph {
    operations: Vec<Arc<Operation>>,
    by_name: HashMap<String, OperationId>,
    edges: Adjacency,
}

impl OperationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Names must be unique within the graph.
    pub fn add_operation(&mut self, options: OperationOptions) -> Result<OperationId> {
        if self.by_name.contains_key(options.name()) {
            return Err(OpgraphError::DuplicateOperation(options.name().to_string()));
        }

        let id = OperationId(self.operations.len());
        let operation = Operation::new(id, options);
        debug!(operation = %operation.name(), %id, "added operation to graph");

        self.by_name.insert(operation.name().to_string(), id);
        self.operations.push(Arc::new(operation));
        self.edges.insert_node(id);
        Ok(id)
    }

    /// Declare that `consumer` cannot run until `dependency` has completed.
    pub fn add_dependency(&mut self, consumer: OperationId, dependency: OperationId) -> Result<()> {
        self.ensure_known(consumer)?;
        self.ensure_known(dependency)?;
        self.edges.add_edge(consumer, dependency);
        Ok(())
    }

    /// Remove a dependency edge. Returns `true` if it existed.
    pub fn delete_dependency(&mut self, consumer: OperationId, dependency: OperationId) -> bool {
        self.edges.remove_edge(consumer, dependency)
    }

    pub fn get(&self, id: OperationId) -> Option<&Arc<Operation>> {
        self.operations.get(id.0)
    }

    pub fn find(&self, name: &str) -> Option<OperationId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = OperationId> + '_ {
        (0..self.operations.len()).map(OperationId)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Arc<Operation>> {
        self.operations.iter()
    }

    pub fn dependencies_of(&self, id: OperationId) -> impl Iterator<Item = OperationId> + '_ {
        self.edges.dependencies_of(id)
    }

    pub fn consumers_of(&self, id: OperationId) -> impl Iterator<Item = OperationId> + '_ {
        self.edges.consumers_of(id)
    }

    pub fn edges(&self) -> &Adjacency {
        &self.edges
    }

    /// Compute and store the priority of every operation in the graph.
    pub fn compute_priorities(&self) -> Result<()> {
        let nodes: BTreeMap<OperationId, Arc<Operation>> = self
            .operations
            .iter()
            .map(|op| (op.id(), Arc::clone(op)))
            .collect();
        let priorities = topology::compute_priorities(&nodes, &self.edges)?;
        for (id, priority) in priorities {
            nodes[&id].set_priority(priority);
        }
        Ok(())
    }

    fn ensure_known(&self, id: OperationId) -> Result<()> {
        if id.0 < self.operations.len() {
            Ok(())
        } else {
            Err(OpgraphError::OperationNotFound(id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_dependency_keeps_edges_symmetric() {
        let mut graph = OperationGraph::new();
        let a = graph.add_operation(OperationOptions::new("a")).unwrap();
        let b = graph.add_operation(OperationOptions::new("b")).unwrap();

        graph.add_dependency(a, b).unwrap();
        assert_eq!(graph.dependencies_of(a).collect::<Vec<_>>(), vec![b]);
        assert_eq!(graph.consumers_of(b).collect::<Vec<_>>(), vec![a]);
        assert_eq!(graph.consumers_of(a).count(), 0);

        assert!(graph.delete_dependency(a, b));
        assert_eq!(graph.dependencies_of(a).count(), 0);
        assert_eq!(graph.consumers_of(b).count(), 0);
        assert!(!graph.delete_dependency(a, b));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut graph = OperationGraph::new();
        graph.add_operation(OperationOptions::new("build")).unwrap();
        let err = graph.add_operation(OperationOptions::new("build")).unwrap_err();
        assert!(matches!(err, OpgraphError::DuplicateOperation(name) if name == "build"));
    }

    #[test]
    fn find_resolves_names() {
        let mut graph = OperationGraph::new();
        let id = graph.add_operation(OperationOptions::new("lint")).unwrap();
        assert_eq!(graph.find("lint"), Some(id));
        assert_eq!(graph.find("missing"), None);
        assert_eq!(graph.get(id).map(|op| op.name()), Some("lint"));
    }
}
