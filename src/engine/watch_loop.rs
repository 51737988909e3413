// src/engine/watch_loop.rs

//! Repeated passes driven by run requests.
//!
//! The loop owns a fresh [`CancellationTokenSource`] per pass. A run request
//! that arrives while a pass is in flight cancels that pass and starts a new
//! one; requests arriving between passes wake the loop. Any number of
//! requests before the loop reacts collapse into a single extra pass.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::cancellation::{CancellationToken, CancellationTokenSource};
use crate::dag::OperationStatus;
use crate::engine::context::RequestRunCallback;
use crate::errors::Result;

pub type PassFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<OperationStatus>> + Send + 'a>>;

/// Handed to the host for each pass.
#[derive(Clone)]
pub struct WatchLoopState {
    /// Fires when this pass should stop: a new run was requested or the loop
    /// is shutting down.
    pub cancellation_token: CancellationToken,
    /// Ask for a new pass. Usually wired into
    /// [`ExecutionOptions::request_run`](crate::engine::ExecutionOptions).
    pub request_run: RequestRunCallback,
}

/// What the watch loop drives.
pub trait WatchLoopHost: Send + Sync {
    /// Run one pass.
    fn execute(&self, state: WatchLoopState) -> PassFuture<'_>;

    fn on_before_execute(&self) {}

    /// Called for every request, including ones that get coalesced.
    fn on_request_run(&self, _requestor: &str, _detail: Option<&str>) {}

    /// Called when a run request or outer cancellation supersedes the
    /// current pass.
    fn on_abort(&self) {}
}

#[derive(Default)]
struct RunSignal {
    pending: AtomicBool,
    notify: Notify,
}

impl RunSignal {
    fn request(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Resolves once a request is pending.
    async fn requested(&self) {
        loop {
            if self.pending.load(Ordering::SeqCst) {
                return;
            }
            self.notify.notified().await;
        }
    }
}

pub struct WatchLoop {
    host: Arc<dyn WatchLoopHost>,
    signal: Arc<RunSignal>,
}

impl WatchLoop {
    pub fn new(host: Arc<dyn WatchLoopHost>) -> Self {
        Self {
            host,
            signal: Arc::new(RunSignal::default()),
        }
    }

    /// A callback that requests a new pass. Safe to call from any thread, at
    /// any time, including between passes.
    pub fn request_run_callback(&self) -> RequestRunCallback {
        let host = Arc::clone(&self.host);
        let signal = Arc::clone(&self.signal);
        Arc::new(move |requestor: &str, detail: Option<&str>| {
            debug!(requestor, detail = detail.unwrap_or(""), "run requested");
            host.on_request_run(requestor, detail);
            signal.request();
        })
    }

    /// Run passes until one finishes without a new request arriving.
    ///
    /// Returns `Cancelled` as soon as `outer` fires, after the in-flight pass
    /// has wound down.
    pub async fn run_until_stable(&self, outer: &CancellationToken) -> Result<OperationStatus> {
        loop {
            if outer.is_cancelled() {
                return Ok(OperationStatus::Cancelled);
            }

            self.signal.pending.store(false, Ordering::SeqCst);
            let source = CancellationTokenSource::new();
            self.host.on_before_execute();

            let mut pass = self.host.execute(WatchLoopState {
                cancellation_token: source.token(),
                request_run: self.request_run_callback(),
            });

            let mut aborted = false;
            let status = loop {
                tokio::select! {
                    biased;
                    _ = self.signal.requested(), if !aborted => {
                        debug!("run requested during pass; aborting it");
                        aborted = true;
                        self.host.on_abort();
                        source.cancel();
                    }
                    _ = outer.cancelled(), if !aborted => {
                        aborted = true;
                        self.host.on_abort();
                        source.cancel();
                    }
                    result = &mut pass => break result?,
                }
            };

            if outer.is_cancelled() {
                return Ok(OperationStatus::Cancelled);
            }
            if self.signal.pending.load(Ordering::SeqCst) {
                // The request landed in the poll that finished the pass.
                if !aborted {
                    debug!("run requested as the pass finished; starting over");
                    self.host.on_abort();
                }
                continue;
            }
            return Ok(status);
        }
    }

    /// Keep the graph up to date until `outer` fires.
    ///
    /// `on_waiting` is called each time the loop goes idle.
    pub async fn run_until_cancelled<F>(&self, outer: &CancellationToken, mut on_waiting: F) -> Result<()>
    where
        F: FnMut(),
    {
        loop {
            let status = self.run_until_stable(outer).await?;
            if outer.is_cancelled() {
                return Ok(());
            }
            info!(%status, "waiting for changes");
            on_waiting();

            tokio::select! {
                _ = self.signal.requested() => {}
                _ = outer.cancelled() => return Ok(()),
            }
        }
    }
}

impl std::fmt::Debug for WatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchLoop")
            .field("pending", &self.signal.pending.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
