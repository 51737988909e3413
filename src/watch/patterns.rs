// src/watch/patterns.rs

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::ConfigFile;

/// `[default]` watch settings.
#[derive(Debug, Clone, Default)]
pub struct WatchDefaults {
    pub watch: Vec<String>,
    pub exclude: Vec<String>,
}

/// Per-operation pattern settings before compilation.
#[derive(Debug, Clone, Default)]
pub struct WatchSpec {
    pub name: String,
    pub watch: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub append_default_watch: bool,
    pub append_default_exclude: bool,
}

impl WatchSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Compiled watch/exclude globs of one operation.
///
/// Patterns are matched against paths relative to the project root, with
/// forward slashes (`"src/main.rs"`).
#[derive(Clone)]
pub struct WatchProfile {
    name: String,
    watch_set: GlobSet,
    exclude_set: Option<GlobSet>,
}

impl fmt::Debug for WatchProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchProfile")
            .field("name", &self.name)
            .field("watch", &self.watch_set.len())
            .finish_non_exhaustive()
    }
}

impl WatchProfile {
    /// Compile `spec`, filling in from `defaults`.
    ///
    /// For each of `watch` and `exclude`:
    /// - operation list plus defaults if `append_default_*` is set;
    /// - otherwise the operation list if present;
    /// - otherwise the defaults.
    pub fn compile(defaults: &WatchDefaults, spec: &WatchSpec) -> Result<Self> {
        let watch = effective_patterns(spec.watch.as_deref(), &defaults.watch, spec.append_default_watch);
        let exclude = effective_patterns(
            spec.exclude.as_deref(),
            &defaults.exclude,
            spec.append_default_exclude,
        );

        let watch_set = build_globset(&watch)
            .with_context(|| format!("building watch globset for operation {}", spec.name))?;
        let exclude_set = if exclude.is_empty() {
            None
        } else {
            Some(
                build_globset(&exclude)
                    .with_context(|| format!("building exclude globset for operation {}", spec.name))?,
            )
        };

        Ok(Self {
            name: spec.name.clone(),
            watch_set,
            exclude_set,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// No watch pattern at all: the operation never reacts to file changes.
    pub fn is_empty(&self) -> bool {
        self.watch_set.is_empty()
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        self.watch_set.is_match(rel_path)
            && !self
                .exclude_set
                .as_ref()
                .is_some_and(|exclude| exclude.is_match(rel_path))
    }
}

fn effective_patterns(own: Option<&[String]>, defaults: &[String], append_default: bool) -> Vec<String> {
    match (own, append_default) {
        (Some(list), true) => list.iter().chain(defaults).cloned().collect(),
        (Some(list), false) => list.to_vec(),
        (None, _) => defaults.to_vec(),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

pub fn build_watch_profiles(defaults: &WatchDefaults, specs: &[WatchSpec]) -> Result<Vec<WatchProfile>> {
    specs
        .iter()
        .map(|spec| WatchProfile::compile(defaults, spec))
        .collect()
}

/// Defaults plus one profile per configured operation.
pub fn profiles_from_config(cfg: &ConfigFile) -> Result<(WatchDefaults, Vec<WatchProfile>)> {
    let defaults = WatchDefaults {
        watch: cfg.default_section().watch.clone(),
        exclude: cfg.default_section().exclude.clone(),
    };

    let specs: Vec<WatchSpec> = cfg
        .operations()
        .iter()
        .map(|(name, op)| WatchSpec {
            name: name.clone(),
            watch: op.watch.clone(),
            exclude: op.exclude.clone(),
            append_default_watch: op.append_default_watch,
            append_default_exclude: op.append_default_exclude,
        })
        .collect();

    let profiles = build_watch_profiles(&defaults, &specs)?;
    Ok((defaults, profiles))
}

/// `path` relative to `root` with forward slashes.
///
/// Falls back to comparing canonicalized paths, since notify may report a
/// different absolute prefix for the same directory (symlinked temp dirs).
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(rel.to_string_lossy().replace('\\', "/"));
    }

    let root = root.canonicalize().ok()?;
    let path = path.canonicalize().ok()?;
    path.strip_prefix(&root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}

/// Every file under `root` matched by `profile`, sorted.
pub fn collect_matching_files(root: &Path, profile: &WatchProfile) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if profile.is_empty() {
        return Ok(files);
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).with_context(|| format!("reading directory {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                if let Some(rel) = relative_path(root, &path) {
                    if profile.matches(&rel) {
                        files.push(path);
                    }
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(defaults: &WatchDefaults, spec: WatchSpec) -> WatchProfile {
        WatchProfile::compile(defaults, &spec).unwrap()
    }

    #[test]
    fn own_patterns_replace_defaults_unless_appended() {
        let defaults = WatchDefaults {
            watch: vec!["src/**/*.rs".into()],
            exclude: vec!["src/gen/**".into()],
        };

        let inherited = profile(&defaults, WatchSpec::new("a"));
        assert!(inherited.matches("src/lib.rs"));
        assert!(!inherited.matches("src/gen/out.rs"));

        let replaced = profile(
            &defaults,
            WatchSpec {
                watch: Some(vec!["docs/**".into()]),
                ..WatchSpec::new("b")
            },
        );
        assert!(replaced.matches("docs/index.md"));
        assert!(!replaced.matches("src/lib.rs"));

        let appended = profile(
            &defaults,
            WatchSpec {
                watch: Some(vec!["docs/**".into()]),
                append_default_watch: true,
                ..WatchSpec::new("c")
            },
        );
        assert!(appended.matches("docs/index.md"));
        assert!(appended.matches("src/lib.rs"));
    }

    #[test]
    fn no_patterns_matches_nothing() {
        let empty = profile(&WatchDefaults::default(), WatchSpec::new("anchor"));
        assert!(empty.is_empty());
        assert!(!empty.matches("src/lib.rs"));
    }

    #[test]
    fn invalid_glob_is_reported() {
        let spec = WatchSpec {
            watch: Some(vec!["src/[".into()]),
            ..WatchSpec::new("broken")
        };
        assert!(WatchProfile::compile(&WatchDefaults::default(), &spec).is_err());
    }

    #[test]
    fn relative_path_uses_forward_slashes() {
        let root = Path::new("/project");
        assert_eq!(
            relative_path(root, Path::new("/project/src/main.rs")).as_deref(),
            Some("src/main.rs")
        );
    }
}
