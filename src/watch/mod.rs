// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module:
//! - compiles `watch` / `exclude` globs per operation;
//! - turns filesystem changes into `request_run` calls via `notify`;
//! - fingerprints watched files for `use_hash` operations.
//!
//! It does not know about the graph: deciding what a new pass does is up to
//! the runners.

pub mod hash;
pub mod patterns;
pub mod watcher;

pub use hash::{compute_file_hash, compute_hash_for_paths, fingerprint_profile};
pub use patterns::{
    build_watch_profiles, collect_matching_files, profiles_from_config, relative_path,
    WatchDefaults, WatchProfile, WatchSpec,
};
pub use watcher::{spawn_watcher, WatcherHandle, WATCHER_REQUESTOR};
