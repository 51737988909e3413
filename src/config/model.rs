// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::Parallelism;

/// Raw configuration as read from TOML, before validation.
///
/// ```toml
/// [config]
/// parallelism = "50%"
///
/// [default]
/// watch = ["src/**/*.rs"]
///
/// [operation.compile]
/// cmd = "cargo build"
/// after = ["codegen"]
/// group = "build"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub default: DefaultSection,

    /// Keyed by operation name.
    #[serde(default)]
    pub operation: BTreeMap<String, OperationConfig>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    config: ConfigSection,
    default: DefaultSection,
    operation: BTreeMap<String, OperationConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        default: DefaultSection,
        operation: BTreeMap<String, OperationConfig>,
    ) -> Self {
        Self {
            config,
            default,
            operation,
        }
    }

    pub fn config_section(&self) -> &ConfigSection {
        &self.config
    }

    pub fn default_section(&self) -> &DefaultSection {
        &self.default
    }

    pub fn operations(&self) -> &BTreeMap<String, OperationConfig> {
        &self.operation
    }
}

/// `[config]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// `4`, `"max"` or `"50%"`. Defaults to all cores.
    #[serde(default)]
    pub parallelism: Parallelism,
}

/// `[default]`: watch settings inherited by every operation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultSection {
    #[serde(default)]
    pub watch: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub use_hash: Option<bool>,
}

/// `[operation.<name>]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationConfig {
    /// Shell command. Operations without one are no-op anchors.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Operations that must complete first.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default)]
    pub group: Option<String>,

    /// Exclude from the count that decides whether a pass did anything.
    #[serde(default)]
    pub silent: bool,

    /// Replaces `default.watch` unless `append_default_watch` is set.
    #[serde(default)]
    pub watch: Option<Vec<String>>,

    #[serde(default)]
    pub exclude: Option<Vec<String>>,

    #[serde(default)]
    pub append_default_watch: bool,

    #[serde(default)]
    pub append_default_exclude: bool,

    /// Skip the command when the watched files hash the same as on the last
    /// successful run.
    #[serde(default)]
    pub use_hash: Option<bool>,
}

fn default_weight() -> u32 {
    1
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            cmd: None,
            after: Vec::new(),
            weight: default_weight(),
            group: None,
            silent: false,
            watch: None,
            exclude: None,
            append_default_watch: false,
            append_default_exclude: false,
            use_hash: None,
        }
    }
}

impl OperationConfig {
    pub fn effective_use_hash(&self, default_use_hash: bool) -> bool {
        self.use_hash.unwrap_or(default_use_hash)
    }
}
