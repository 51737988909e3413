// src/engine/context.rs

//! Context objects shared during a pass.
//!
//! - [`ExecuteContext`] is built once per pass by the execution manager and
//!   shared by every operation: cancellation, the gate, group bookkeeping.
//! - [`RunnerContext`] is what a single runner invocation sees.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, error, info};

use crate::cancellation::CancellationToken;
use crate::dag::{Adjacency, GroupRecord, Operation, OperationId, OperationState, OperationStatus};
use crate::engine::gate::WorkGate;
use crate::errors::Result;

/// Host callback asking for a new pass: `(requestor, detail)`.
pub type RequestRunCallback = Arc<dyn Fn(&str, Option<&str>) + Send + Sync>;

/// Per-pass context shared by every operation.
pub struct ExecuteContext {
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) request_run: Option<RequestRunCallback>,
    pub(crate) gate: WorkGate,
    operations: Arc<BTreeMap<OperationId, Arc<Operation>>>,
    edges: Arc<Adjacency>,
    groups: Arc<Mutex<BTreeMap<String, GroupRecord>>>,
    failures: Mutex<Vec<String>>,
}

impl ExecuteContext {
    pub(crate) fn new(
        cancellation_token: CancellationToken,
        request_run: Option<RequestRunCallback>,
        gate: WorkGate,
        operations: Arc<BTreeMap<OperationId, Arc<Operation>>>,
        edges: Arc<Adjacency>,
        groups: Arc<Mutex<BTreeMap<String, GroupRecord>>>,
    ) -> Self {
        Self {
            cancellation_token,
            request_run,
            gate,
            operations,
            edges,
            groups,
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn gate(&self) -> &WorkGate {
        &self.gate
    }

    /// Dependencies of `id` that belong to this pass.
    pub(crate) fn dependencies_of(&self, id: OperationId) -> Vec<Arc<Operation>> {
        self.edges
            .dependencies_of(id)
            .filter_map(|dep| self.operations.get(&dep).cloned())
            .collect()
    }

    /// Concurrency-limited execution of `work`, admitted by `priority`.
    pub async fn queue_work<F, T>(&self, priority: u64, work: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.gate.queue_work(priority, work).await
    }

    /// Called once a member has been admitted and is about to run.
    pub(crate) fn before_execute(&self, operation: &Operation) {
        let Some(group_name) = operation.group_name() else {
            return;
        };

        let mut groups = lock(&self.groups);
        if let Some(group) = groups.get_mut(group_name) {
            if group.start_timer() {
                info!(group = %group_name, operations = group.len(), " ---- {group_name} started ---- ");
            }
        }
    }

    /// Called after the runner loop has settled.
    pub(crate) fn after_execute(&self, operation: &Operation, state: &OperationState) {
        let elapsed_ms = state.stopwatch.duration().as_millis() as u64;

        if state.status == OperationStatus::Failure {
            // Surfaced even for silent runners.
            match &state.error {
                Some(err) => error!(
                    operation = %operation.name(),
                    elapsed_ms,
                    error = %format!("{err:#}"),
                    "operation failed"
                ),
                None => error!(operation = %operation.name(), elapsed_ms, "operation failed"),
            }
            lock(&self.failures).push(operation.name().to_string());
        } else if operation.is_silent() {
            debug!(operation = %operation.name(), status = %state.status, elapsed_ms, "operation finished");
        } else {
            info!(operation = %operation.name(), status = %state.status, elapsed_ms, "operation finished");
        }

        let Some(group_name) = operation.group_name() else {
            return;
        };

        let mut groups = lock(&self.groups);
        if let Some(group) = groups.get_mut(group_name) {
            if group.set_operation_complete(operation.id(), state.status) {
                let label = group.outcome_label();
                let secs = group.duration().as_secs_f64();
                info!(
                    group = %group_name,
                    has_failures = group.has_failures(),
                    has_cancellations = group.has_cancellations(),
                    elapsed_ms = group.duration().as_millis() as u64,
                    " ---- {group_name} {label} ({secs:.3}s) ---- "
                );
            }
        }
    }

    /// Names of operations that failed during this pass, in completion order.
    pub fn failures(&self) -> Vec<String> {
        lock(&self.failures).clone()
    }
}

impl fmt::Debug for ExecuteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteContext")
            .field("cancellation_token", &self.cancellation_token)
            .field("gate", &self.gate)
            .field("operations", &self.operations.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The `request_run` capability handed to a runner.
///
/// Holds the operation weakly so a runner that keeps its context around does
/// not keep the graph alive.
#[derive(Clone)]
enum RequestRunTarget {
    Operation {
        operation: Weak<Operation>,
        outer: Option<RequestRunCallback>,
    },
    Detached,
}

/// What a runner sees during one invocation.
#[derive(Clone)]
pub struct RunnerContext {
    operation_name: String,
    cancellation_token: CancellationToken,
    is_first_run: bool,
    request_run: RequestRunTarget,
    gate: WorkGate,
    priority: u64,
}

impl RunnerContext {
    pub(crate) fn for_operation(
        operation: &Arc<Operation>,
        execute: &ExecuteContext,
        is_first_run: bool,
    ) -> Self {
        Self {
            operation_name: operation.name().to_string(),
            cancellation_token: execute.cancellation_token.clone(),
            is_first_run,
            request_run: RequestRunTarget::Operation {
                operation: Arc::downgrade(operation),
                outer: execute.request_run.clone(),
            },
            gate: execute.gate.clone(),
            priority: operation.priority().unwrap_or(0),
        }
    }

    /// A context not attached to any graph, for driving a runner directly.
    ///
    /// `request_run` is a no-op and `queue_work` uses a private gate of one.
    pub fn detached(operation_name: impl Into<String>, cancellation_token: CancellationToken) -> Self {
        Self {
            operation_name: operation_name.into(),
            cancellation_token,
            is_first_run: true,
            request_run: RequestRunTarget::Detached,
            gate: WorkGate::new(1),
            priority: 0,
        }
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// True iff the operation has no state from a previous pass.
    pub fn is_first_run(&self) -> bool {
        self.is_first_run
    }

    /// Ask for this operation to run again.
    ///
    /// While the operation is still unsettled in the current pass this only
    /// schedules an immediate extra runner invocation. Once it has settled,
    /// the request is forwarded to the host so a whole new pass can start.
    pub fn request_run(&self, detail: Option<&str>) -> Result<()> {
        match &self.request_run {
            RequestRunTarget::Operation { operation, outer } => match operation.upgrade() {
                Some(operation) => operation.request_run(outer.as_ref(), detail),
                None => {
                    debug!(operation = %self.operation_name, "request_run after graph was dropped; ignoring");
                    Ok(())
                }
            },
            RequestRunTarget::Detached => Ok(()),
        }
    }

    /// Run sub-work through the same concurrency gate as operations.
    ///
    /// The calling runner already holds a slot, so with a parallelism of one
    /// this waits until that slot is released.
    pub async fn queue_work<F, T>(&self, work: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.gate.queue_work(self.priority, work).await
    }
}

impl fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerContext")
            .field("operation", &self.operation_name)
            .field("is_first_run", &self.is_first_run)
            .field("cancelled", &self.cancellation_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Collect the group records for `operations`, keyed by group name.
pub(crate) fn build_group_records<'a>(
    operations: impl IntoIterator<Item = &'a Arc<Operation>>,
) -> BTreeMap<String, GroupRecord> {
    let mut groups: BTreeMap<String, GroupRecord> = BTreeMap::new();
    for operation in operations {
        if let Some(name) = operation.group_name() {
            groups
                .entry(name.to_string())
                .or_insert_with(|| GroupRecord::new(name))
                .add_operation(operation.id());
        }
    }
    groups
}
