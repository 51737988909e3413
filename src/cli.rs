// src/cli.rs

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::loader::DEFAULT_CONFIG_FILE;
use crate::types::Parallelism;

/// `opgraph [--once] [--dry-run] [--config PATH] [--parallelism N]`
#[derive(Debug, Clone, Parser)]
#[command(
    name = "opgraph",
    version,
    about = "Run a graph of dependent commands with bounded parallelism, once or on every change.",
    long_about = None
)]
pub struct CliArgs {
    /// Config file. Commands and watch patterns are relative to its directory.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Run one pass and exit. Exits with status 1 if any operation failed.
    #[arg(long, conflicts_with = "dry_run")]
    pub once: bool,

    /// How many operations may run at once: a count, "max", or a share of
    /// the cores such as "50%". Takes precedence over `[config].parallelism`.
    #[arg(long, value_name = "N")]
    pub parallelism: Option<Parallelism>,

    /// Log filter level. Without it `OPGRAPH_LOG` is used, then `info`.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Print the validated graph with computed priorities and exit.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter directive for this level.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parallelism_flag() {
        let args = CliArgs::try_parse_from(["opgraph", "--once", "--parallelism", "50%"]).unwrap();
        assert!(args.once);
        assert_eq!(args.parallelism, Some(Parallelism::Percentage(50)));
        assert_eq!(args.config, PathBuf::from("Opgraph.toml"));

        assert!(CliArgs::try_parse_from(["opgraph", "--parallelism", "0"]).is_err());
    }

    #[test]
    fn once_and_dry_run_conflict() {
        assert!(CliArgs::try_parse_from(["opgraph", "--once", "--dry-run"]).is_err());
    }
}
