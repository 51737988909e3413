// src/watch/hash.rs

//! Content fingerprints for `use_hash` operations.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::trace;

use crate::watch::patterns::{collect_matching_files, WatchProfile};

pub fn compute_file_hash(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("opening file for hashing: {}", path.display()))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Aggregate hash over the given files, independent of their order.
///
/// Paths are mixed in alongside contents, so renaming a file changes the
/// result. Paths that are not regular files are skipped.
pub fn compute_hash_for_paths<I, P>(paths: I) -> Result<String>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut sorted: Vec<PathBuf> = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
    sorted.sort();

    let mut hasher = Hasher::new();
    for path in sorted.iter().filter(|p| p.is_file()) {
        let file_hash = compute_file_hash(path)?;
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(file_hash.as_bytes());
    }

    let hash = hasher.finalize().to_hex().to_string();
    trace!(files = sorted.len(), hash = %hash, "computed aggregate hash");
    Ok(hash)
}

/// Fingerprint of every file under `root` matched by `profile`.
pub fn fingerprint_profile(root: &Path, profile: &WatchProfile) -> Result<String> {
    let files = collect_matching_files(root, profile)?;
    compute_hash_for_paths(files)
}
