// src/engine/mod.rs

//! Execution engine.
//!
//! - [`manager`] runs one pass over a validated set of operations.
//! - [`gate`] bounds how many operations run at once, preferring the longest
//!   critical path.
//! - [`context`] carries per-pass state to operations and runners.
//! - [`watch_loop`] repeats passes whenever a run is requested.

pub mod context;
pub mod gate;
pub mod manager;
pub mod watch_loop;

pub use context::{ExecuteContext, RequestRunCallback, RunnerContext};
pub use gate::{GatePermit, WorkGate};
pub use manager::{ExecutionManager, ExecutionOptions};
pub use watch_loop::{PassFuture, WatchLoop, WatchLoopHost, WatchLoopState};
