// src/exec/runner.rs

//! The `OperationRunner` seam between the scheduler and the work it runs.
//!
//! The scheduler never knows what an operation does. It hands the runner a
//! [`RunnerContext`] and records whatever status comes back; an `Err` is
//! captured into the operation's state as a `Failure`.

use std::future::Future;
use std::pin::Pin;

use crate::dag::OperationStatus;
use crate::engine::RunnerContext;

/// Boxed future returned by runners.
pub type RunnerFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<OperationStatus>> + Send + 'a>>;

/// Implements the actual work of an operation.
///
/// Production code uses [`ShellRunner`](crate::exec::ShellRunner); tests can
/// provide their own implementation that records calls or sleeps.
pub trait OperationRunner: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Silent runners are excluded from the operation count that decides
    /// whether a pass as a whole was a no-op. Their failures are still logged.
    fn silent(&self) -> bool {
        false
    }

    fn execute(&self, context: RunnerContext) -> RunnerFuture<'_>;
}
