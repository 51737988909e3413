// src/watch/watcher.rs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use notify::event::EventKind;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::engine::RequestRunCallback;
use crate::watch::patterns::{relative_path, WatchProfile};

/// Requestor name passed to `request_run` for file changes.
pub const WATCHER_REQUESTOR: &str = "watcher";

/// Keeps the underlying notify watcher alive. Dropping it stops watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Watch `root` recursively and request a new pass whenever a changed path
/// matches any profile.
///
/// The changed path (relative to `root`) is passed as the request detail.
pub fn spawn_watcher(
    root: impl Into<PathBuf>,
    profiles: Vec<WatchProfile>,
    request_run: RequestRunCallback,
) -> Result<WatcherHandle> {
    let root = root.into();
    let root = root.canonicalize().unwrap_or(root);
    let profiles = Arc::new(profiles);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                // Receiver gone means we are shutting down.
                let _ = event_tx.send(event);
            }
            Err(err) => eprintln!("opgraph: file watch error: {err}"),
        },
        Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    info!(root = %root.display(), profiles = profiles.len(), "file watcher started");

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if matches!(event.kind, EventKind::Access(_)) {
                continue;
            }
            trace!(?event, "received notify event");

            for path in &event.paths {
                let Some(rel) = relative_path(&root, path) else {
                    warn!(path = %path.display(), "ignoring change outside the watch root");
                    continue;
                };

                let interested: Vec<&str> = profiles
                    .iter()
                    .filter(|profile| profile.matches(&rel))
                    .map(WatchProfile::name)
                    .collect();

                if interested.is_empty() {
                    continue;
                }
                debug!(path = %rel, operations = ?interested, "watched file changed");
                request_run(WATCHER_REQUESTOR, Some(&rel));
            }
        }
        debug!("watcher event loop finished");
    });

    Ok(WatcherHandle { _inner: watcher })
}
