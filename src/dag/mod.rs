// src/dag/mod.rs

//! The operation graph.
//!
//! - [`graph`] is the arena of operations with symmetric dependency and
//!   consumer edges.
//! - [`operation`] holds a node and its per-pass state machine.
//! - [`topology`] computes critical-path priorities and detects cycles.
//! - [`group`] tracks start/finish of operations sharing a group label.
//! - [`state`] defines statuses, per-run state and stopwatches.

pub mod graph;
pub mod group;
pub mod operation;
pub mod state;
pub mod topology;

pub use graph::{Adjacency, OperationGraph, OperationId};
pub use group::GroupRecord;
pub use operation::{Operation, OperationFuture, OperationOptions};
pub use state::{OperationState, OperationStatus, Stopwatch};
