// src/types.rs

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::Deserialize;

use crate::errors::OpgraphError;

/// Requested number of operations that may run at once.
///
/// Accepted spellings:
/// - `"max"`: one slot per available core;
/// - `"NN%"`: that share of the cores, rounded down, at least one;
/// - a positive integer.
///
/// Defaults to the number of available cores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawParallelism")]
pub enum Parallelism {
    #[default]
    Max,
    Percentage(u8),
    Count(NonZeroUsize),
}

impl Parallelism {
    /// Resolve against the cores of this machine.
    pub fn resolve(self) -> usize {
        let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        self.resolve_with(cores)
    }

    pub fn resolve_with(self, cores: usize) -> usize {
        let cores = cores.max(1);
        match self {
            Parallelism::Max => cores,
            Parallelism::Percentage(percent) => (cores * usize::from(percent) / 100).max(1),
            Parallelism::Count(count) => count.get(),
        }
    }
}

impl FromStr for Parallelism {
    type Err = OpgraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("max") {
            return Ok(Parallelism::Max);
        }

        if let Some(percent) = trimmed.strip_suffix('%') {
            return match percent.trim().parse::<u8>() {
                Ok(value @ 1..=100) => Ok(Parallelism::Percentage(value)),
                _ => Err(OpgraphError::InvalidParallelism(format!(
                    "{trimmed} (percentage must be between 1% and 100%)"
                ))),
            };
        }

        trimmed
            .parse::<usize>()
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Parallelism::Count)
            .ok_or_else(|| {
                OpgraphError::InvalidParallelism(format!(
                    "{trimmed} (expected a positive integer, \"max\", or a percentage like \"50%\")"
                ))
            })
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parallelism::Max => f.write_str("max"),
            Parallelism::Percentage(percent) => write!(f, "{percent}%"),
            Parallelism::Count(count) => write!(f, "{count}"),
        }
    }
}

/// Either spelling accepted in TOML: `parallelism = 4` or `parallelism = "50%"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawParallelism {
    Number(i64),
    Text(String),
}

impl TryFrom<RawParallelism> for Parallelism {
    type Error = OpgraphError;

    fn try_from(raw: RawParallelism) -> Result<Self, Self::Error> {
        match raw {
            RawParallelism::Number(n) => usize::try_from(n)
                .ok()
                .and_then(NonZeroUsize::new)
                .map(Parallelism::Count)
                .ok_or_else(|| {
                    OpgraphError::InvalidParallelism(format!("{n} (must be at least 1)"))
                }),
            RawParallelism::Text(text) => text.parse(),
        }
    }
}
