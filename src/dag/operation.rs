// src/dag/operation.rs

//! A single node of the operation graph and its per-pass state machine.
//!
//! ```text
//! Ready -> Executing -> Success | NoOp | Failure | Cancelled
//! Ready -> Cancelled | Blocked            (runner never invoked)
//! ```
//!
//! [`Operation::execute`] is memoized per pass: concurrent callers (several
//! consumers awaiting the same dependency) share one in-flight result.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::dag::graph::OperationId;
use crate::dag::state::{OperationState, OperationStatus};
use crate::engine::context::{ExecuteContext, RequestRunCallback, RunnerContext};
use crate::errors::{OpgraphError, Result};
use crate::exec::OperationRunner;

/// Future returned by [`Operation::execute`].
pub type OperationFuture<'a> = Pin<Box<dyn Future<Output = OperationStatus> + Send + 'a>>;

/// Everything needed to add an operation to a graph.
#[derive(Clone)]
pub struct OperationOptions {
    name: String,
    group: Option<String>,
    runner: Option<Arc<dyn OperationRunner>>,
    weight: u32,
}

impl OperationOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: None,
            runner: None,
            weight: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_runner<R>(self, runner: R) -> Self
    where
        R: OperationRunner + 'static,
    {
        self.with_shared_runner(Arc::new(runner))
    }

    pub fn with_shared_runner(mut self, runner: Arc<dyn OperationRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Contribution to priority. `0` is allowed for near-free operations.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

impl fmt::Debug for OperationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationOptions")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("runner", &self.runner.as_ref().map(|r| r.name().to_string()))
            .field("weight", &self.weight)
            .finish()
    }
}

type InFlight = Arc<OnceCell<OperationStatus>>;

#[derive(Default)]
struct OperationRecord {
    priority: Option<u64>,
    state: Option<OperationState>,
    last_state: Option<OperationState>,
    in_flight: InFlight,
}

impl OperationRecord {
    fn state_mut(&mut self) -> &mut OperationState {
        self.state.get_or_insert_with(OperationState::new)
    }
}

/// What the re-entrant loop decided after one runner invocation.
enum LoopStep {
    Again,
    Settled(OperationStatus),
}

pub struct Operation {
    id: OperationId,
    name: String,
    group: Option<String>,
    weight: u32,
    runner: Option<Arc<dyn OperationRunner>>,
    record: Mutex<OperationRecord>,
    run_pending: AtomicBool,
}

impl Operation {
    pub(crate) fn new(id: OperationId, options: OperationOptions) -> Self {
        Self {
            id,
            name: options.name,
            group: options.group,
            weight: options.weight,
            runner: options.runner,
            record: Mutex::new(OperationRecord::default()),
            run_pending: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_name(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn runner(&self) -> Option<&Arc<dyn OperationRunner>> {
        self.runner.as_ref()
    }

    /// Operations without a runner count as non-silent.
    pub fn is_silent(&self) -> bool {
        self.runner.as_ref().is_some_and(|runner| runner.silent())
    }

    /// Critical-path length; `None` until the topology has been analyzed.
    pub fn priority(&self) -> Option<u64> {
        self.lock().priority
    }

    pub(crate) fn set_priority(&self, priority: u64) {
        self.lock().priority = Some(priority);
    }

    /// State of the current pass, if the operation has been reset at least once.
    pub fn state(&self) -> Option<OperationState> {
        self.lock().state.clone()
    }

    /// State of the previous pass.
    pub fn last_state(&self) -> Option<OperationState> {
        self.lock().last_state.clone()
    }

    /// Current status; `Ready` before the first reset.
    pub fn status(&self) -> OperationStatus {
        self.lock()
            .state
            .as_ref()
            .map_or(OperationStatus::Ready, |state| state.status)
    }

    /// Prepare for a new pass.
    ///
    /// Moves `state` into `last_state`, starts over at `Ready` with a fresh
    /// stopwatch, and forgets the previous pass's in-flight result.
    pub fn reset(&self) {
        let mut record = self.lock();
        if let Some(previous) = record.state.take() {
            record.last_state = Some(previous);
        }
        record.state = Some(OperationState::new());
        record.in_flight = InFlight::default();
        self.run_pending.store(true, Ordering::SeqCst);
        trace!(operation = %self.name, "reset");
    }

    /// Handle a run request coming from this operation's runner.
    ///
    /// An unsettled operation only schedules another runner invocation. A
    /// settled one forwards to `outer` so the host can start a new pass.
    pub(crate) fn request_run(
        &self,
        outer: Option<&RequestRunCallback>,
        detail: Option<&str>,
    ) -> Result<()> {
        let record = self.lock();
        let Some(status) = record.state.as_ref().map(|state| state.status) else {
            return Err(OpgraphError::Internal(format!(
                "run requested for operation {:?} before it was reset",
                self.name
            )));
        };

        match status {
            OperationStatus::Ready | OperationStatus::Executing => {
                self.run_pending.store(true, Ordering::SeqCst);
                trace!(operation = %self.name, %status, "run pending");
                Ok(())
            }
            OperationStatus::Success
            | OperationStatus::NoOp
            | OperationStatus::Failure
            | OperationStatus::Cancelled
            | OperationStatus::Blocked => {
                drop(record);
                match outer {
                    Some(callback) => callback(&self.name, detail),
                    None => debug!(
                        operation = %self.name,
                        detail = detail.unwrap_or(""),
                        "run requested after settling, but no host is listening"
                    ),
                }
                Ok(())
            }
        }
    }

    /// Run this operation for the current pass, at most once.
    ///
    /// Every caller within the same pass observes the same terminal status.
    pub fn execute<'a>(self: &'a Arc<Self>, context: &'a ExecuteContext) -> OperationFuture<'a> {
        Box::pin(async move {
            let cell = Arc::clone(&self.lock().in_flight);
            *cell
                .get_or_init(|| Arc::clone(self).execute_inner(context))
                .await
        })
    }

    async fn execute_inner(self: Arc<Self>, context: &ExecuteContext) -> OperationStatus {
        let dependencies = context.dependencies_of(self.id);
        let settled = join_all(dependencies.iter().map(|dep| dep.execute(context))).await;

        if context.cancellation_token().is_cancelled() {
            return self.settle_early(OperationStatus::Cancelled);
        }

        let blocked = settled.iter().any(|status| {
            matches!(
                status,
                OperationStatus::Blocked | OperationStatus::Failure
            )
        });
        if blocked {
            return self.settle_early(OperationStatus::Blocked);
        }

        let priority = self.priority().unwrap_or(0);
        trace!(operation = %self.name, priority, "waiting for gate");

        let permit = tokio::select! {
            biased;
            _ = context.cancellation_token().cancelled() => {
                return self.settle_early(OperationStatus::Cancelled);
            }
            permit = context.gate().acquire(priority) => permit,
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(err) => return self.settle_with_error(context, err),
        };

        if context.cancellation_token().is_cancelled() {
            return self.settle_early(OperationStatus::Cancelled);
        }

        context.before_execute(&self);
        let is_first_run = {
            let mut record = self.lock();
            let state = record.state_mut();
            state.status = OperationStatus::Executing;
            state.stopwatch.start();
            record.last_state.is_none()
        };
        debug!(operation = %self.name, priority, is_first_run, "executing");

        let runner_context = RunnerContext::for_operation(&self, context, is_first_run);
        let mut invocations = 0usize;

        let status = loop {
            self.run_pending.store(false, Ordering::SeqCst);
            invocations += 1;

            let (status, error) = self.invoke_runner(runner_context.clone()).await;

            match self.after_invocation(context, status, error) {
                LoopStep::Again => {
                    trace!(operation = %self.name, invocations, "run requested during execution; running again");
                }
                LoopStep::Settled(status) => break status,
            }
        };

        let state = {
            let mut record = self.lock();
            let state = record.state_mut();
            state.stopwatch.stop();
            state.clone()
        };
        context.after_execute(&self, &state);
        status
    }

    async fn invoke_runner(
        &self,
        runner_context: RunnerContext,
    ) -> (OperationStatus, Option<Arc<anyhow::Error>>) {
        let Some(runner) = &self.runner else {
            return (OperationStatus::NoOp, None);
        };

        match runner.execute(runner_context).await {
            Ok(status) if status.is_terminal() => (status, None),
            Ok(status) => (
                OperationStatus::Failure,
                Some(Arc::new(anyhow::anyhow!(
                    "runner {:?} returned non-terminal status {status}",
                    runner.name()
                ))),
            ),
            Err(err) => (OperationStatus::Failure, Some(Arc::new(err))),
        }
    }

    /// Decide, under the record lock, whether to run again or settle.
    ///
    /// `request_run` inspects the status under the same lock, so a request
    /// either lands before this check (and is honoured here) or after the
    /// terminal status is written (and goes to the host).
    fn after_invocation(
        &self,
        context: &ExecuteContext,
        status: OperationStatus,
        error: Option<Arc<anyhow::Error>>,
    ) -> LoopStep {
        let mut record = self.lock();

        if self.run_pending.load(Ordering::SeqCst) {
            if !context.cancellation_token().is_cancelled() {
                return LoopStep::Again;
            }
            let state = record.state_mut();
            state.status = OperationStatus::Cancelled;
            state.error = None;
            return LoopStep::Settled(OperationStatus::Cancelled);
        }

        let state = record.state_mut();
        state.status = status;
        state.error = error;
        LoopStep::Settled(status)
    }

    /// Terminal status reached without entering the gate.
    fn settle_early(&self, status: OperationStatus) -> OperationStatus {
        self.lock().state_mut().status = status;
        debug!(operation = %self.name, %status, "settled without running");
        status
    }

    fn settle_with_error(&self, context: &ExecuteContext, err: OpgraphError) -> OperationStatus {
        let state = {
            let mut record = self.lock();
            let state = record.state_mut();
            state.status = OperationStatus::Failure;
            state.error = Some(Arc::new(anyhow::Error::new(err)));
            state.clone()
        };
        context.after_execute(self, &state);
        OperationStatus::Failure
    }

    fn lock(&self) -> MutexGuard<'_, OperationRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("group", &self.group)
            .field("weight", &self.weight)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dag::graph::OperationGraph;

    fn single(options: OperationOptions) -> (OperationGraph, Arc<Operation>) {
        let mut graph = OperationGraph::new();
        let id = graph.add_operation(options).unwrap();
        let op = Arc::clone(graph.get(id).unwrap());
        (graph, op)
    }

    #[test]
    fn options_default_weight_is_one() {
        let (_graph, op) = single(OperationOptions::new("build"));
        assert_eq!(op.weight(), 1);
        assert!(op.group_name().is_none());
        assert!(!op.is_silent());
        assert_eq!(op.priority(), None);
        assert_eq!(op.status(), OperationStatus::Ready);
    }

    #[test]
    fn reset_moves_state_into_last_state() {
        let (_graph, op) = single(OperationOptions::new("build").with_group("compile"));
        assert!(op.state().is_none());

        op.reset();
        assert!(op.last_state().is_none());
        {
            let mut record = op.lock();
            let state = record.state_mut();
            state.status = OperationStatus::Success;
        }

        op.reset();
        let last = op.last_state().unwrap();
        let current = op.state().unwrap();
        assert_eq!(last.status, OperationStatus::Success);
        assert_eq!(current.status, OperationStatus::Ready);
        assert_eq!(current.stopwatch.duration(), Duration::ZERO);
        assert!(op.run_pending.load(Ordering::SeqCst));
    }

    #[test]
    fn request_run_before_reset_is_an_internal_error() {
        let (_graph, op) = single(OperationOptions::new("build"));
        let err = op.request_run(None, None).unwrap_err();
        assert!(matches!(err, OpgraphError::Internal(_)));
    }

    #[test]
    fn request_run_while_unsettled_only_flags_pending() {
        let (_graph, op) = single(OperationOptions::new("build"));
        op.reset();
        op.run_pending.store(false, Ordering::SeqCst);

        let calls = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = Arc::clone(&calls);
        let outer: RequestRunCallback = Arc::new(move |name: &str, _detail: Option<&str>| {
            seen.lock().unwrap().push(name.to_string());
        });

        op.request_run(Some(&outer), None).unwrap();
        assert!(op.run_pending.load(Ordering::SeqCst));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn request_run_after_settling_goes_to_host() {
        let (_graph, op) = single(OperationOptions::new("build"));
        op.reset();
        op.lock().state_mut().status = OperationStatus::Failure;

        let calls = Arc::new(Mutex::new(Vec::<(String, Option<String>)>::new()));
        let seen = Arc::clone(&calls);
        let outer: RequestRunCallback = Arc::new(move |name: &str, detail: Option<&str>| {
            seen.lock()
                .unwrap()
                .push((name.to_string(), detail.map(str::to_string)));
        });

        op.request_run(Some(&outer), Some("src/lib.rs")).unwrap();
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[("build".to_string(), Some("src/lib.rs".to_string()))]
        );

        // No host: logged and ignored.
        op.request_run(None, None).unwrap();
    }
}
