#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opgraph::dag::OperationStatus;
use opgraph::engine::RunnerContext;
use opgraph::exec::{OperationRunner, RunnerFuture};

/// Shared event log: `"start:<name>"` / `"end:<name>"` in the order they
/// happened.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Counters a test keeps after handing the runner to the graph.
#[derive(Debug, Default)]
pub struct RunnerStats {
    calls: AtomicUsize,
    first_runs: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RunnerStats {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Invocations that saw `is_first_run() == true`.
    pub fn first_runs(&self) -> usize {
        self.first_runs.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
enum Behaviour {
    Return(OperationStatus),
    Fail(String),
    WaitForCancellation,
}

/// Configurable fake runner.
pub struct ScriptedRunner {
    name: String,
    silent: bool,
    behaviour: Behaviour,
    delay: Option<Duration>,
    self_requests: AtomicUsize,
    stats: Arc<RunnerStats>,
    concurrency: Option<Arc<RunnerStats>>,
    log: Option<EventLog>,
    context_slot: Option<Arc<Mutex<Option<RunnerContext>>>>,
}

impl ScriptedRunner {
    /// Succeeds immediately.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            silent: false,
            behaviour: Behaviour::Return(OperationStatus::Success),
            delay: None,
            self_requests: AtomicUsize::new(0),
            stats: Arc::new(RunnerStats::default()),
            concurrency: None,
            log: None,
            context_slot: None,
        }
    }

    pub fn returning(mut self, status: OperationStatus) -> Self {
        self.behaviour = Behaviour::Return(status);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.behaviour = Behaviour::Fail(message.to_string());
        self
    }

    /// Block until the pass is cancelled, then report `Cancelled`.
    pub fn until_cancelled(mut self) -> Self {
        self.behaviour = Behaviour::WaitForCancellation;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Sleep (Tokio time) before finishing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Call `request_run` on itself during the next `n` invocations.
    pub fn requesting_runs(self, n: usize) -> Self {
        self.self_requests.store(n, Ordering::SeqCst);
        self
    }

    /// Track concurrent invocations across several runners.
    pub fn sharing_concurrency(mut self, shared: Arc<RunnerStats>) -> Self {
        self.concurrency = Some(shared);
        self
    }

    pub fn logging_to(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Store the most recent context so the test can call `request_run`
    /// after the operation has settled.
    pub fn keeping_context(mut self, slot: Arc<Mutex<Option<RunnerContext>>>) -> Self {
        self.context_slot = Some(slot);
        self
    }

    pub fn stats(&self) -> Arc<RunnerStats> {
        Arc::clone(&self.stats)
    }

    fn record(&self, event: &str) {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(format!("{event}:{}", self.name));
        }
    }

    async fn run(&self, context: RunnerContext) -> anyhow::Result<OperationStatus> {
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        if context.is_first_run() {
            self.stats.first_runs.fetch_add(1, Ordering::SeqCst);
        }

        let _active = ActiveGuard::enter(&self.stats, self.concurrency.as_deref());
        self.record("start");

        if let Some(slot) = &self.context_slot {
            *slot.lock().unwrap() = Some(context.clone());
        }

        let wants_rerun = self
            .self_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if wants_rerun {
            context.request_run(Some("scripted"))?;
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = match &self.behaviour {
            Behaviour::Return(status) => Ok(*status),
            Behaviour::Fail(message) => Err(anyhow::anyhow!("{message}")),
            Behaviour::WaitForCancellation => {
                context.cancellation_token().cancelled().await;
                Ok(OperationStatus::Cancelled)
            }
        };

        self.record("end");
        result
    }
}

impl OperationRunner for ScriptedRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn silent(&self) -> bool {
        self.silent
    }

    fn execute(&self, context: RunnerContext) -> RunnerFuture<'_> {
        Box::pin(self.run(context))
    }
}

struct ActiveGuard<'a> {
    counters: [Option<&'a RunnerStats>; 2],
}

impl<'a> ActiveGuard<'a> {
    fn enter(own: &'a RunnerStats, shared: Option<&'a RunnerStats>) -> Self {
        let counters = [Some(own), shared];
        for stats in counters.iter().flatten() {
            let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
            stats.max_active.fetch_max(now, Ordering::SeqCst);
        }
        Self { counters }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        for stats in self.counters.iter().flatten() {
            stats.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
