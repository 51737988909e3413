// src/dag/topology.rs

//! Critical-path priorities and cycle detection.
//!
//! The walk follows **consumer** edges: an operation's priority is its own
//! weight plus the largest priority among the operations waiting on it, so it
//! measures how much downstream work is held up by that operation.
//!
//! ```text
//! priority(op) = weight(op) + max(priority(c) for c in consumers(op))
//! priority(op) = weight(op)                     if consumers(op) is empty
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::trace;

use crate::dag::graph::{Adjacency, OperationId};
use crate::dag::operation::Operation;
use crate::errors::{OpgraphError, Result};

/// Compute the priority of every operation in `operations`.
///
/// Consumer edges leading outside `operations` are ignored. Returns
/// [`OpgraphError::DagCycle`] with the shortest cycle through the first
/// revisited node if the graph is not acyclic.
pub fn compute_priorities(
    operations: &BTreeMap<OperationId, Arc<Operation>>,
    edges: &Adjacency,
) -> Result<BTreeMap<OperationId, u64>> {
    let mut analyzer = Analyzer {
        operations,
        edges,
        priorities: BTreeMap::new(),
        on_stack: HashSet::new(),
    };

    for &id in operations.keys() {
        analyzer.visit(id)?;
    }

    Ok(analyzer.priorities)
}

struct Analyzer<'a> {
    operations: &'a BTreeMap<OperationId, Arc<Operation>>,
    edges: &'a Adjacency,
    priorities: BTreeMap<OperationId, u64>,
    on_stack: HashSet<OperationId>,
}

/// One operation on the explicit DFS stack.
struct Frame {
    id: OperationId,
    /// Consumers still to visit, in reverse so `pop` yields ascending ids.
    pending: Vec<OperationId>,
    downstream: u64,
}

impl Analyzer<'_> {
    /// Depth-first walk from `root` over consumer edges.
    ///
    /// The stack is kept on the heap so long dependency chains cannot
    /// exhaust the thread stack.
    fn visit(&mut self, root: OperationId) -> Result<()> {
        if self.priorities.contains_key(&root) {
            return Ok(());
        }

        let mut stack = vec![self.enter(root)];
        while let Some(frame) = stack.last_mut() {
            if let Some(consumer) = frame.pending.pop() {
                if let Some(&priority) = self.priorities.get(&consumer) {
                    frame.downstream = frame.downstream.max(priority);
                } else if self.on_stack.contains(&consumer) {
                    return Err(self.cycle_error(consumer));
                } else {
                    let next = self.enter(consumer);
                    stack.push(next);
                }
                continue;
            }

            let Some(done) = stack.pop() else { break };
            self.on_stack.remove(&done.id);

            let weight = self
                .operations
                .get(&done.id)
                .map_or(0, |op| u64::from(op.weight()));
            let priority = weight.saturating_add(done.downstream);
            trace!(operation = %self.name(done.id), priority, "computed priority");
            self.priorities.insert(done.id, priority);

            if let Some(parent) = stack.last_mut() {
                parent.downstream = parent.downstream.max(priority);
            }
        }

        Ok(())
    }

    fn enter(&mut self, id: OperationId) -> Frame {
        self.on_stack.insert(id);
        let mut pending: Vec<OperationId> = self.consumers_of(id).collect();
        pending.reverse();
        Frame {
            id,
            pending,
            downstream: 0,
        }
    }

    fn consumers_of(&self, id: OperationId) -> impl Iterator<Item = OperationId> + '_ {
        self.edges
            .consumers_of(id)
            .filter(|consumer| self.operations.contains_key(consumer))
    }

    fn name(&self, id: OperationId) -> String {
        self.operations
            .get(&id)
            .map_or_else(|| id.to_string(), |op| op.name().to_string())
    }

    /// Build the diagnostic for a cycle closing at `revisited`.
    ///
    /// The reported path is the shortest consumer chain from `revisited` back
    /// to itself, so every element is a dependency of the next one.
    fn cycle_error(&self, revisited: OperationId) -> OpgraphError {
        let path = self
            .shortest_cycle(revisited)
            .unwrap_or_else(|| vec![revisited, revisited]);
        OpgraphError::DagCycle {
            path: path.into_iter().map(|id| self.name(id)).collect(),
        }
    }

    fn shortest_cycle(&self, start: OperationId) -> Option<Vec<OperationId>> {
        let mut parent: HashMap<OperationId, OperationId> = HashMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            for consumer in self.consumers_of(node) {
                if consumer == start {
                    let mut path = vec![node];
                    let mut cursor = node;
                    while cursor != start {
                        cursor = parent[&cursor];
                        path.push(cursor);
                    }
                    path.reverse();
                    path.push(start);
                    return Some(path);
                }
                if consumer != start && !parent.contains_key(&consumer) {
                    parent.insert(consumer, node);
                    queue.push_back(consumer);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::graph::OperationGraph;
    use crate::dag::operation::OperationOptions;

    fn op(graph: &mut OperationGraph, name: &str, weight: u32) -> OperationId {
        graph
            .add_operation(OperationOptions::new(name).with_weight(weight))
            .unwrap()
    }

    fn priority(graph: &OperationGraph, id: OperationId) -> u64 {
        graph.get(id).and_then(|op| op.priority()).unwrap()
    }

    #[test]
    fn critical_path_on_lifecycle_graph() {
        // Start -> P1 -> {T1, Finish}, T1 -> Finish
        let mut graph = OperationGraph::new();
        let start = op(&mut graph, "Start", 1);
        let p1 = op(&mut graph, "P1", 1);
        let t1 = op(&mut graph, "T1", 2);
        let finish = op(&mut graph, "Finish", 1);

        graph.add_dependency(p1, start).unwrap();
        graph.add_dependency(t1, p1).unwrap();
        graph.add_dependency(finish, p1).unwrap();
        graph.add_dependency(finish, t1).unwrap();

        graph.compute_priorities().unwrap();

        assert_eq!(priority(&graph, finish), 1);
        assert_eq!(priority(&graph, t1), 3);
        assert_eq!(priority(&graph, p1), 4);
        assert_eq!(priority(&graph, start), 5);
    }

    #[test]
    fn zero_weight_operations_add_nothing() {
        let mut graph = OperationGraph::new();
        let restore = op(&mut graph, "restore", 0);
        let build = op(&mut graph, "build", 1);
        graph.add_dependency(build, restore).unwrap();

        graph.compute_priorities().unwrap();
        assert_eq!(priority(&graph, build), 1);
        assert_eq!(priority(&graph, restore), 1);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut graph = OperationGraph::new();
        let a = op(&mut graph, "a", 1);
        graph.add_dependency(a, a).unwrap();

        let err = graph.compute_priorities().unwrap_err();
        match err {
            OpgraphError::DagCycle { path } => assert_eq!(path, vec!["a", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn reports_shortest_cycle_not_whole_stack() {
        // entry -> a -> b -> c -> a, plus a shortcut b -> a.
        let mut graph = OperationGraph::new();
        let entry = op(&mut graph, "entry", 1);
        let a = op(&mut graph, "a", 1);
        let b = op(&mut graph, "b", 1);
        let c = op(&mut graph, "c", 1);

        graph.add_dependency(a, entry).unwrap();
        graph.add_dependency(b, a).unwrap();
        graph.add_dependency(c, b).unwrap();
        graph.add_dependency(a, c).unwrap();
        graph.add_dependency(a, b).unwrap();

        let err = graph.compute_priorities().unwrap_err();
        let OpgraphError::DagCycle { path } = err else {
            panic!("expected a cycle error");
        };

        assert_eq!(path.len(), 3, "unexpected cycle {path:?}");
        assert_eq!(path.first(), path.last());
        assert!(path.contains(&"a".to_string()));
        assert!(path.contains(&"b".to_string()));
        assert!(!path.contains(&"entry".to_string()));
    }

    #[test]
    fn long_chain_does_not_exhaust_the_stack() {
        const LEN: u32 = 10_000;
        let mut graph = OperationGraph::new();
        let ids: Vec<OperationId> = (0..LEN)
            .map(|i| op(&mut graph, &format!("step-{i}"), 1))
            .collect();
        for pair in ids.windows(2) {
            graph.add_dependency(pair[1], pair[0]).unwrap();
        }

        // Run on a thread with the default test stack size.
        let graph = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                graph.compute_priorities().unwrap();
                graph
            })
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(priority(&graph, ids[0]), u64::from(LEN));
        assert_eq!(priority(&graph, ids[ids.len() - 1]), 1);
    }

    #[test]
    fn cycle_at_the_end_of_a_long_chain_is_reported() {
        let mut graph = OperationGraph::new();
        let ids: Vec<OperationId> = (0..5_000)
            .map(|i| op(&mut graph, &format!("step-{i}"), 1))
            .collect();
        for pair in ids.windows(2) {
            graph.add_dependency(pair[1], pair[0]).unwrap();
        }
        let last = ids[ids.len() - 1];
        let before = ids[ids.len() - 2];
        graph.add_dependency(before, last).unwrap();

        match graph.compute_priorities().unwrap_err() {
            OpgraphError::DagCycle { path } => {
                assert_eq!(path, vec!["step-4998", "step-4999", "step-4998"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }
}
