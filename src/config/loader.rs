// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Looked up in the current directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "Opgraph.toml";

/// Read and deserialize `path`. Only TOML-level checks apply here
/// (unknown keys, parallelism syntax).
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).inspect_err(|err| {
        warn!(path = %path.display(), error = %err, "cannot read config file");
    })?;

    let raw: RawConfigFile = toml::from_str(&text)?;
    debug!(
        path = %path.display(),
        operations = raw.operation.len(),
        parallelism = %raw.config.parallelism,
        "config parsed"
    );
    Ok(raw)
}

/// [`load_from_path`] followed by the semantic checks in `validate.rs`.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    load_from_path(path)?.try_into()
}
