// src/config/validate.rs

//! Semantic checks on a parsed config.
//!
//! Cycles are not checked here: the topology analyzer reports them with the
//! shortest offending path once the graph is built.

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{OpgraphError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = OpgraphError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.default, raw.operation))
    }
}

pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_operations(cfg)?;
    validate_dependencies(cfg)?;
    validate_commands(cfg)?;
    Ok(())
}

fn ensure_has_operations(cfg: &RawConfigFile) -> Result<()> {
    if cfg.operation.is_empty() {
        return Err(OpgraphError::ConfigError(
            "config must contain at least one [operation.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, op) in &cfg.operation {
        for dep in &op.after {
            if dep == name {
                return Err(OpgraphError::ConfigError(format!(
                    "operation '{name}' cannot depend on itself in `after`"
                )));
            }
            if !cfg.operation.contains_key(dep) {
                return Err(OpgraphError::ConfigError(format!(
                    "operation '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_commands(cfg: &RawConfigFile) -> Result<()> {
    for (name, op) in &cfg.operation {
        if op.cmd.as_deref().is_some_and(|cmd| cmd.trim().is_empty()) {
            return Err(OpgraphError::ConfigError(format!(
                "operation '{name}' has an empty `cmd`; omit it for a no-op operation"
            )));
        }
    }
    Ok(())
}
