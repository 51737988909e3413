// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: structural checks (known dependencies, at least one
//!   operation).
//! - `build.rs`: turning a validated config into an `OperationGraph`.

pub mod build;
pub mod loader;
pub mod model;
pub mod validate;

pub use build::build_graph;
pub use loader::{load_and_validate, load_from_path, DEFAULT_CONFIG_FILE};
pub use model::{ConfigFile, ConfigSection, DefaultSection, OperationConfig, RawConfigFile};
pub use validate::validate_config;
