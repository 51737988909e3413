// src/lib.rs

pub mod cancellation;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cancellation::CancellationTokenSource;
use crate::cli::CliArgs;
use crate::config::{build_graph, load_and_validate, ConfigFile};
use crate::dag::{OperationGraph, OperationStatus};
use crate::engine::{ExecutionManager, ExecutionOptions, PassFuture, WatchLoop, WatchLoopHost, WatchLoopState};

/// High-level entry point used by `main.rs`.
///
/// Loads the config, builds and validates the graph, then either prints it
/// (`--dry-run`), runs a single pass (`--once`), or keeps re-running passes
/// on file changes until Ctrl-C.
pub async fn run(args: CliArgs) -> Result<OperationStatus> {
    let config_path = args.config.clone();
    let cfg = load_and_validate(&config_path)?;
    let root = config_root_dir(&config_path);

    let graph = build_graph(&cfg, &root)?;
    let manager = Arc::new(ExecutionManager::for_graph(&graph)?);

    let parallelism = args
        .parallelism
        .unwrap_or(cfg.config_section().parallelism)
        .resolve();

    if args.dry_run {
        print_dry_run(&cfg, &graph, parallelism);
        return Ok(OperationStatus::NoOp);
    }

    let shutdown = CancellationTokenSource::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl+C received; shutting down");
            shutdown.cancel();
        });
    }

    if args.once {
        let options = ExecutionOptions::new(parallelism).with_cancellation_token(shutdown.token());
        return Ok(manager.execute(options).await?);
    }

    let watch_loop = WatchLoop::new(Arc::new(GraphHost {
        manager,
        parallelism,
    }));

    let (_defaults, profiles) = crate::watch::profiles_from_config(&cfg)?;
    let _watcher = crate::watch::spawn_watcher(root, profiles, watch_loop.request_run_callback())?;

    watch_loop
        .run_until_cancelled(&shutdown.token(), || info!("waiting for file changes"))
        .await?;

    Ok(OperationStatus::Cancelled)
}

/// Watch-mode host: every pass is a full execution of the graph.
struct GraphHost {
    manager: Arc<ExecutionManager>,
    parallelism: usize,
}

impl WatchLoopHost for GraphHost {
    fn execute(&self, state: WatchLoopState) -> PassFuture<'_> {
        let options = ExecutionOptions::new(self.parallelism)
            .with_cancellation_token(state.cancellation_token)
            .with_request_run(state.request_run);
        Box::pin(async move { Ok(self.manager.execute(options).await?) })
    }

    fn on_request_run(&self, requestor: &str, detail: Option<&str>) {
        info!(requestor, detail = detail.unwrap_or(""), "new pass requested");
    }

    fn on_abort(&self) {
        info!("cancelling in-flight pass");
    }
}

/// Directory patterns and commands are relative to.
///
/// The config file's parent, or the current directory for a bare filename.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn print_dry_run(cfg: &ConfigFile, graph: &OperationGraph, parallelism: usize) {
    println!("opgraph dry-run");
    println!("  parallelism = {parallelism}");
    println!();

    println!("operations ({}):", graph.len());
    for op in graph.operations() {
        println!("  - {}", op.name());
        if let Some(priority) = op.priority() {
            println!("      priority: {priority}");
        }
        println!("      weight: {}", op.weight());
        if let Some(cmd) = cfg.operations().get(op.name()).and_then(|c| c.cmd.as_deref()) {
            println!("      cmd: {cmd}");
        }
        if let Some(group) = op.group_name() {
            println!("      group: {group}");
        }
        let deps: Vec<&str> = graph
            .dependencies_of(op.id())
            .filter_map(|id| graph.get(id).map(|dep| dep.name()))
            .collect();
        if !deps.is_empty() {
            println!("      after: {deps:?}");
        }
        if op.is_silent() {
            println!("      silent: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
