// tests/topology_props.rs

use opgraph::dag::{OperationGraph, OperationId, OperationOptions};
use opgraph::engine::ExecutionManager;
use opgraph::errors::OpgraphError;
use opgraph_test_utils::builders::{priority_of, GraphBuilder};
use proptest::prelude::*;

/// Random DAG: edges only from a lower index to a higher one, so it is
/// acyclic by construction.
fn arb_dag() -> impl Strategy<Value = (Vec<u32>, Vec<(usize, usize)>)> {
    (1usize..12).prop_flat_map(|n| {
        let weights = prop::collection::vec(0u32..6, n);
        let edges = prop::collection::vec((0..n, 0..n), 0..(n * 2))
            .prop_map(|pairs| {
                pairs
                    .into_iter()
                    .filter(|(a, b)| a < b)
                    .collect::<Vec<_>>()
            });
        (weights, edges)
    })
}

fn build(weights: &[u32], edges: &[(usize, usize)]) -> (OperationGraph, Vec<OperationId>) {
    let mut graph = OperationGraph::new();
    let ids: Vec<OperationId> = weights
        .iter()
        .enumerate()
        .map(|(i, &w)| {
            graph
                .add_operation(OperationOptions::new(format!("op{i}")).with_weight(w))
                .unwrap()
        })
        .collect();
    for &(dependency, consumer) in edges {
        graph.add_dependency(ids[consumer], ids[dependency]).unwrap();
    }
    (graph, ids)
}

proptest! {
    #[test]
    fn priority_is_weight_plus_heaviest_consumer((weights, edges) in arb_dag()) {
        let (graph, ids) = build(&weights, &edges);
        ExecutionManager::for_graph(&graph).unwrap();

        for &id in &ids {
            let op = graph.get(id).unwrap();
            let downstream = graph
                .consumers_of(id)
                .map(|c| graph.get(c).unwrap().priority().unwrap())
                .max()
                .unwrap_or(0);
            prop_assert_eq!(op.priority().unwrap(), u64::from(op.weight()) + downstream);
        }
    }

    #[test]
    fn back_edge_reports_a_real_cycle(
        (weights, edges) in arb_dag(),
        pick in any::<prop::sample::Index>(),
    ) {
        // Close a cycle by reversing an existing edge.
        prop_assume!(!edges.is_empty());
        let (dependency, consumer) = edges[pick.index(edges.len())];
        let (mut graph, ids) = build(&weights, &edges);
        graph.add_dependency(ids[dependency], ids[consumer]).unwrap();

        let err = ExecutionManager::for_graph(&graph).unwrap_err();
        let path = match err {
            OpgraphError::DagCycle { path } => path,
            other => panic!("expected a cycle error, got {other:?}"),
        };

        prop_assert!(path.len() >= 2);
        prop_assert_eq!(path.first(), path.last());
        // Each element is a dependency of the next one.
        for pair in path.windows(2) {
            let from = graph.find(&pair[0]).unwrap();
            let to = graph.find(&pair[1]).unwrap();
            prop_assert!(
                graph.consumers_of(from).any(|c| c == to),
                "{} -> {} is not an edge in {:?}", pair[0], pair[1], path
            );
        }
        // Every cycle goes through the edge we added.
        let dependency_name = format!("op{dependency}");
        let consumer_name = format!("op{consumer}");
        prop_assert!(path.contains(&dependency_name));
        prop_assert!(path.contains(&consumer_name));
    }
}

#[test]
fn lifecycle_graph_priorities() {
    let graph = GraphBuilder::new()
        .op("Start")
        .op("P1")
        .weighted("T1", 2)
        .op("Finish")
        .after("P1", "Start")
        .after("T1", "P1")
        .after("Finish", "P1")
        .after("Finish", "T1")
        .build();

    ExecutionManager::for_graph(&graph).unwrap();

    assert_eq!(priority_of(&graph, "Finish"), 1);
    assert_eq!(priority_of(&graph, "T1"), 3);
    assert_eq!(priority_of(&graph, "P1"), 4);
    assert_eq!(priority_of(&graph, "Start"), 5);
}

#[test]
fn cycle_diagnostic_names_only_the_cycle() {
    // entry -> a -> b -> c -> a
    let graph = GraphBuilder::new()
        .op("entry")
        .op("a")
        .op("b")
        .op("c")
        .after("a", "entry")
        .after("b", "a")
        .after("c", "b")
        .after("a", "c")
        .build();

    let err = ExecutionManager::for_graph(&graph).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Cycle detected in operation graph:"), "{message}");
    assert!(!message.contains("entry"), "{message}");
    match err {
        OpgraphError::DagCycle { path } => assert_eq!(path.len(), 4),
        other => panic!("unexpected {other:?}"),
    }
}
