// src/config/build.rs

//! Turn a validated config into an operation graph.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::model::ConfigFile;
use crate::dag::{OperationGraph, OperationOptions};
use crate::errors::{OpgraphError, Result};
use crate::exec::ShellRunner;
use crate::watch::{profiles_from_config, WatchProfile};

/// Build the graph described by `cfg`.
///
/// Operations with a `cmd` get a [`ShellRunner`] running in `root`; the rest
/// are runner-less anchors. Cycles are not detected here; they surface when
/// an execution manager is built over the graph.
pub fn build_graph(cfg: &ConfigFile, root: &Path) -> Result<OperationGraph> {
    let (_defaults, profiles) = profiles_from_config(cfg)?;
    let profiles: HashMap<&str, &WatchProfile> =
        profiles.iter().map(|profile| (profile.name(), profile)).collect();
    let default_use_hash = cfg.default_section().use_hash.unwrap_or(false);

    let mut graph = OperationGraph::new();

    for (name, op) in cfg.operations() {
        let mut options = OperationOptions::new(name).with_weight(op.weight);
        if let Some(group) = &op.group {
            options = options.with_group(group);
        }

        match &op.cmd {
            Some(cmd) => {
                let mut runner = ShellRunner::new(name, cmd)
                    .with_working_dir(root)
                    .with_silent(op.silent);

                if op.effective_use_hash(default_use_hash) {
                    match profiles.get(name.as_str()) {
                        Some(profile) if !profile.is_empty() => {
                            runner = runner.with_fingerprint(root, (*profile).clone());
                        }
                        _ => warn!(operation = %name, "use_hash is set but no watch patterns apply; ignoring"),
                    }
                }
                options = options.with_runner(runner);
            }
            None if op.silent => {
                warn!(operation = %name, "silent has no effect on an operation without cmd");
            }
            None => {}
        }

        let id = graph.add_operation(options)?;
        debug!(operation = %name, %id, "operation from config");
    }

    for (name, op) in cfg.operations() {
        let consumer = graph
            .find(name)
            .ok_or_else(|| OpgraphError::OperationNotFound(name.clone()))?;
        for dep in &op.after {
            let dependency = graph
                .find(dep)
                .ok_or_else(|| OpgraphError::OperationNotFound(dep.clone()))?;
            graph.add_dependency(consumer, dependency)?;
        }
    }

    Ok(graph)
}
