#![allow(dead_code)]

use std::sync::Arc;

use opgraph::dag::{Operation, OperationGraph, OperationId, OperationOptions, OperationStatus};

use crate::runners::ScriptedRunner;

/// Builder for `OperationGraph` addressing operations by name.
pub struct GraphBuilder {
    graph: OperationGraph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: OperationGraph::new(),
        }
    }

    /// Runner-less operation (reports `NoOp`).
    pub fn op(self, name: &str) -> Self {
        self.options(OperationOptions::new(name))
    }

    pub fn weighted(self, name: &str, weight: u32) -> Self {
        self.options(OperationOptions::new(name).with_weight(weight))
    }

    pub fn runner(self, name: &str, runner: ScriptedRunner) -> Self {
        self.options(OperationOptions::new(name).with_runner(runner))
    }

    pub fn options(mut self, options: OperationOptions) -> Self {
        self.graph
            .add_operation(options)
            .expect("duplicate operation in test graph");
        self
    }

    /// `consumer` runs after `dependency`.
    pub fn after(mut self, consumer: &str, dependency: &str) -> Self {
        let consumer = self.id(consumer);
        let dependency = self.id(dependency);
        self.graph
            .add_dependency(consumer, dependency)
            .expect("failed to add dependency in test graph");
        self
    }

    pub fn build(self) -> OperationGraph {
        self.graph
    }

    fn id(&self, name: &str) -> OperationId {
        self.graph
            .find(name)
            .unwrap_or_else(|| panic!("unknown operation {name:?} in test graph"))
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn operation<'a>(graph: &'a OperationGraph, name: &str) -> &'a Arc<Operation> {
    let id = graph
        .find(name)
        .unwrap_or_else(|| panic!("unknown operation {name:?}"));
    graph.get(id).expect("id from find must resolve")
}

pub fn status_of(graph: &OperationGraph, name: &str) -> OperationStatus {
    operation(graph, name).status()
}

pub fn priority_of(graph: &OperationGraph, name: &str) -> u64 {
    operation(graph, name)
        .priority()
        .unwrap_or_else(|| panic!("priority of {name:?} not computed"))
}
