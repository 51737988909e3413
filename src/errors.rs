// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpgraphError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error(
        "Operation {operation:?} declares a dependency on operation {dependency:?} \
         that is not in the set of operations to execute"
    )]
    MissingDependency { operation: String, dependency: String },

    #[error("Duplicate operation name: {0}")]
    DuplicateOperation(String),

    /// Each entry in `path` is a dependency of the entry that follows it.
    #[error("Cycle detected in operation graph: {}", path.join(" -> "))]
    DagCycle { path: Vec<String> },

    #[error("Invalid parallelism: {0}")]
    InvalidParallelism(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, OpgraphError>;
