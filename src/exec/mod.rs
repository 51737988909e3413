// src/exec/mod.rs

//! What operations actually do.
//!
//! - [`runner`] defines the `OperationRunner` trait the scheduler calls.
//! - [`shell`] provides `ShellRunner`, which runs a shell command and is what
//!   configured operations use in production. Tests plug in their own runners.

pub mod runner;
pub mod shell;

pub use runner::{OperationRunner, RunnerFuture};
pub use shell::ShellRunner;
