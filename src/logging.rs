// src/logging.rs

//! Subscriber setup.
//!
//! The filter comes from the first of:
//! 1. `--log-level`;
//! 2. `OPGRAPH_LOG`, read as an `EnvFilter` directive list, so
//!    `OPGRAPH_LOG=opgraph::engine=trace,info` works;
//! 3. `info`.
//!
//! Everything is written to stderr. Command output forwarded by the shell
//! runner goes through the same subscriber.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "OPGRAPH_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV_VAR).ok();
    let filter = build_filter(cli_level, env.as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))?;

    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level.as_str());
    }

    match env.map(str::trim).filter(|spec| !spec.is_empty()) {
        Some(spec) => EnvFilter::try_new(spec).unwrap_or_else(|err| {
            eprintln!("opgraph: ignoring invalid {LOG_ENV_VAR}={spec:?}: {err}");
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        None => EnvFilter::new(DEFAULT_DIRECTIVE),
    }
}
