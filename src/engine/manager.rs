// src/engine/manager.rs

//! One-pass orchestration over a dependency-closed set of operations.
//!
//! Construction validates the set and analyzes its topology once. Every call
//! to [`ExecutionManager::execute`] is a full pass: reset, dispatch every
//! operation concurrently, aggregate.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::cancellation::CancellationToken;
use crate::dag::{Adjacency, GroupRecord, Operation, OperationGraph, OperationId, OperationStatus};
use crate::dag::topology;
use crate::engine::context::{build_group_records, ExecuteContext, RequestRunCallback};
use crate::engine::gate::WorkGate;
use crate::errors::{OpgraphError, Result};

/// Options for a single pass.
#[derive(Clone)]
pub struct ExecutionOptions {
    /// Requested concurrency. Clamped to the number of non-silent
    /// operations, and never below one.
    pub parallelism: usize,
    pub cancellation_token: CancellationToken,
    /// Host hook invoked when a settled operation asks to run again.
    pub request_run: Option<RequestRunCallback>,
}

impl ExecutionOptions {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism,
            cancellation_token: CancellationToken::never(),
            request_run: None,
        }
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn with_request_run(mut self, request_run: RequestRunCallback) -> Self {
        self.request_run = Some(request_run);
        self
    }
}

impl std::fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("parallelism", &self.parallelism)
            .field("cancellation_token", &self.cancellation_token)
            .field("request_run", &self.request_run.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct ExecutionManager {
    operations: Arc<BTreeMap<OperationId, Arc<Operation>>>,
    edges: Arc<Adjacency>,
    groups: Arc<Mutex<BTreeMap<String, GroupRecord>>>,
    non_silent: usize,
    last_failures: Mutex<Vec<String>>,
    /// Passes never overlap: `reset` must finish before the next pass starts.
    pass_lock: tokio::sync::Mutex<()>,
}

impl ExecutionManager {
    /// Manage every operation in `graph`.
    pub fn for_graph(graph: &OperationGraph) -> Result<Self> {
        Self::new(graph, graph.ids())
    }

    /// Manage the operations in `selection`.
    ///
    /// Fails with [`OpgraphError::MissingDependency`] if a selected operation
    /// depends on one outside the selection, and with
    /// [`OpgraphError::DagCycle`] if the selection is cyclic.
    pub fn new(
        graph: &OperationGraph,
        selection: impl IntoIterator<Item = OperationId>,
    ) -> Result<Self> {
        let mut operations = BTreeMap::new();
        for id in selection {
            let op = graph
                .get(id)
                .ok_or_else(|| OpgraphError::OperationNotFound(id.to_string()))?;
            operations.insert(id, Arc::clone(op));
        }

        let mut edges = Adjacency::default();
        for (&id, op) in &operations {
            edges.insert_node(id);
            for dependency in graph.dependencies_of(id) {
                if !operations.contains_key(&dependency) {
                    let dependency_name = graph
                        .get(dependency)
                        .map_or_else(|| dependency.to_string(), |dep| dep.name().to_string());
                    return Err(OpgraphError::MissingDependency {
                        operation: op.name().to_string(),
                        dependency: dependency_name,
                    });
                }
                edges.add_edge(id, dependency);
            }
        }

        let priorities = topology::compute_priorities(&operations, &edges)?;
        for (id, priority) in priorities {
            if let Some(op) = operations.get(&id) {
                op.set_priority(priority);
            }
        }

        let groups = build_group_records(operations.values());
        let non_silent = operations.values().filter(|op| !op.is_silent()).count();

        debug!(
            operations = operations.len(),
            non_silent,
            groups = groups.len(),
            "execution manager built"
        );

        Ok(Self {
            operations: Arc::new(operations),
            edges: Arc::new(edges),
            groups: Arc::new(Mutex::new(groups)),
            non_silent,
            last_failures: Mutex::new(Vec::new()),
            pass_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn operations(&self) -> impl Iterator<Item = &Arc<Operation>> {
        self.operations.values()
    }

    pub fn get(&self, id: OperationId) -> Option<&Arc<Operation>> {
        self.operations.get(&id)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations whose runner is not silent. Runner-less operations count.
    pub fn non_silent_count(&self) -> usize {
        self.non_silent
    }

    /// Snapshot of the group records as of the last pass.
    pub fn groups(&self) -> Vec<GroupRecord> {
        lock(&self.groups).values().cloned().collect()
    }

    /// Names of operations that failed in the most recent pass.
    pub fn last_failures(&self) -> Vec<String> {
        lock(&self.last_failures).clone()
    }

    /// Run one full pass and return the aggregate status.
    ///
    /// - `NoOp` if there are no non-silent operations;
    /// - otherwise `Cancelled` if the token fired, even when some operations
    ///   failed first;
    /// - otherwise `Failure` if any operation failed;
    /// - otherwise `Success`.
    ///
    /// A panic inside a runner is re-raised on the caller.
    pub async fn execute(&self, options: ExecutionOptions) -> Result<OperationStatus> {
        let _pass = self.pass_lock.lock().await;

        for group in lock(&self.groups).values_mut() {
            group.reset();
        }
        for op in self.operations.values() {
            op.reset();
        }

        let max_concurrency = self.non_silent.min(options.parallelism).max(1);
        info!(
            operations = self.operations.len(),
            non_silent = self.non_silent,
            max_concurrency,
            "starting pass"
        );

        let token = options.cancellation_token.clone();
        let context = Arc::new(ExecuteContext::new(
            options.cancellation_token,
            options.request_run,
            WorkGate::new(max_concurrency),
            Arc::clone(&self.operations),
            Arc::clone(&self.edges),
            Arc::clone(&self.groups),
        ));

        // Spawn the critical path first; the gate settles the rest.
        let mut ordered: Vec<&Arc<Operation>> = self.operations.values().collect();
        ordered.sort_by_key(|op| Reverse(op.priority().unwrap_or(0)));

        let mut tasks = JoinSet::new();
        for op in ordered {
            let op = Arc::clone(op);
            let context = Arc::clone(&context);
            tasks.spawn(async move { op.execute(&context).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tasks.abort_all();
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
                return Err(OpgraphError::Internal(format!(
                    "operation task did not complete: {err}"
                )));
            }
        }

        let failures = context.failures();
        if !failures.is_empty() {
            error!(count = failures.len(), failed = ?failures, "operations failed during pass");
        }
        *lock(&self.last_failures) = failures;

        let any_failed = self
            .operations
            .values()
            .any(|op| op.status() == OperationStatus::Failure);

        let status = if self.non_silent == 0 {
            OperationStatus::NoOp
        } else if token.is_cancelled() {
            OperationStatus::Cancelled
        } else if any_failed {
            OperationStatus::Failure
        } else {
            OperationStatus::Success
        };

        info!(%status, "pass finished");
        Ok(status)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
