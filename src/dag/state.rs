// src/dag/state.rs

//! Per-run operation state: status, captured error, and timing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Status of an operation within a single pass.
///
/// `Ready` and `Executing` are transient; every other value is terminal for
/// the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    /// Initial state after a reset.
    Ready,
    /// The runner is currently executing.
    Executing,
    Success,
    /// The operation ran but had nothing to do (or has no runner).
    NoOp,
    Failure,
    Cancelled,
    /// The operation's own work never ran because a dependency did not succeed.
    Blocked,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationStatus::Ready | OperationStatus::Executing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Ready => "ready",
            OperationStatus::Executing => "executing",
            OperationStatus::Success => "success",
            OperationStatus::NoOp => "no-op",
            OperationStatus::Failure => "failure",
            OperationStatus::Cancelled => "cancelled",
            OperationStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock timer for an operation or group.
///
/// Uses Tokio's clock so paused-time tests see simulated durations.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stopwatch {
    started: Option<Instant>,
    stopped: Option<Instant>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
        self.stopped = None;
    }

    /// Stop the timer. No-op if it was never started.
    pub fn stop(&mut self) {
        if self.started.is_some() && self.stopped.is_none() {
            self.stopped = Some(Instant::now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some() && self.stopped.is_none()
    }

    /// Elapsed time; zero if never started, live if still running.
    pub fn duration(&self) -> Duration {
        match (self.started, self.stopped) {
            (Some(start), Some(stop)) => stop.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            (None, _) => Duration::ZERO,
        }
    }
}

/// State of one operation for one pass.
#[derive(Debug, Clone)]
pub struct OperationState {
    pub status: OperationStatus,
    /// Error returned by the runner, if the pass ended in `Failure` because of it.
    pub error: Option<Arc<anyhow::Error>>,
    pub stopwatch: Stopwatch,
}

impl OperationState {
    pub fn new() -> Self {
        Self {
            status: OperationStatus::Ready,
            error: None,
            stopwatch: Stopwatch::new(),
        }
    }
}

impl Default for OperationState {
    fn default() -> Self {
        Self::new()
    }
}
