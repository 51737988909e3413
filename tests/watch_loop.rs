// tests/watch_loop.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opgraph::cancellation::{CancellationToken, CancellationTokenSource};
use opgraph::dag::OperationStatus;
use opgraph::engine::{
    ExecutionManager, ExecutionOptions, PassFuture, RunnerContext, WatchLoop, WatchLoopHost,
    WatchLoopState,
};
use opgraph_test_utils::builders::GraphBuilder;
use opgraph_test_utils::runners::ScriptedRunner;
use opgraph_test_utils::{init_tracing, with_timeout};

/// What a scripted pass does, keyed by its 1-based pass number.
#[derive(Clone, Copy)]
enum Pass {
    Finish,
    RequestThenWait,
    RequestThriceThenFinish,
    WaitForCancellation,
}

struct ScriptedHost {
    script: fn(usize) -> Pass,
    passes: AtomicUsize,
    aborts: AtomicUsize,
    requests: AtomicUsize,
}

impl ScriptedHost {
    fn new(script: fn(usize) -> Pass) -> Arc<Self> {
        Arc::new(Self {
            script,
            passes: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
        })
    }

    fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

impl WatchLoopHost for ScriptedHost {
    fn execute(&self, state: WatchLoopState) -> PassFuture<'_> {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let script = (self.script)(pass);
        Box::pin(async move {
            match script {
                Pass::Finish => Ok(OperationStatus::Success),
                Pass::RequestThenWait => {
                    (state.request_run)("editor", Some("saved"));
                    state.cancellation_token.cancelled().await;
                    Ok(OperationStatus::Cancelled)
                }
                Pass::RequestThriceThenFinish => {
                    for _ in 0..3 {
                        (state.request_run)("watcher", None);
                    }
                    Ok(OperationStatus::Success)
                }
                Pass::WaitForCancellation => {
                    state.cancellation_token.cancelled().await;
                    Ok(OperationStatus::Cancelled)
                }
            }
        })
    }

    fn on_request_run(&self, _requestor: &str, _detail: Option<&str>) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn on_abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn request_during_pass_aborts_and_starts_over() {
    with_timeout(async {
        init_tracing();

        let host = ScriptedHost::new(|pass| match pass {
            1 => Pass::RequestThenWait,
            _ => Pass::Finish,
        });
        let watch = WatchLoop::new(host.clone());

        let status = watch.run_until_stable(&CancellationToken::never()).await.unwrap();

        assert_eq!(status, OperationStatus::Success);
        assert_eq!(host.passes(), 2);
        assert_eq!(host.aborts(), 1);
    })
    .await
}

#[tokio::test]
async fn burst_of_requests_makes_one_extra_pass() {
    with_timeout(async {
        init_tracing();

        let host = ScriptedHost::new(|pass| match pass {
            1 => Pass::RequestThriceThenFinish,
            _ => Pass::Finish,
        });
        let watch = WatchLoop::new(host.clone());

        let status = watch.run_until_stable(&CancellationToken::never()).await.unwrap();

        assert_eq!(status, OperationStatus::Success);
        assert_eq!(host.passes(), 2);
        assert_eq!(host.requests.load(Ordering::SeqCst), 3);
        // The requests land in the same poll that finishes the pass.
        assert_eq!(host.aborts(), 1, "late requests must still abort the pass");
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn outer_cancellation_winds_down_the_pass() {
    init_tracing();

    let host = ScriptedHost::new(|_| Pass::WaitForCancellation);
    let watch = WatchLoop::new(host.clone());
    let shutdown = CancellationTokenSource::with_delay(Duration::from_millis(50));

    let status = watch.run_until_stable(&shutdown.token()).await.unwrap();

    assert_eq!(status, OperationStatus::Cancelled);
    assert_eq!(host.passes(), 1);
    assert_eq!(host.aborts(), 1);
}

#[tokio::test]
async fn requests_while_idle_coalesce() {
    with_timeout(async {
        init_tracing();

        let host = ScriptedHost::new(|_| Pass::Finish);
        let watch = WatchLoop::new(host.clone());
        let request = watch.request_run_callback();

        watch.run_until_stable(&CancellationToken::never()).await.unwrap();
        assert_eq!(host.passes(), 1);

        request("a", None);
        request("b", Some("second"));

        let shutdown = CancellationTokenSource::new();
        let mut waits = 0;
        watch
            .run_until_cancelled(&shutdown.token(), || {
                waits += 1;
                shutdown.cancel();
            })
            .await
            .unwrap();

        // The two pending requests become a single pass.
        assert_eq!(waits, 1);
        assert_eq!(host.passes(), 2);
    })
    .await
}

/// Drives a real execution manager, like watch mode does.
struct GraphHost {
    manager: ExecutionManager,
}

impl WatchLoopHost for GraphHost {
    fn execute(&self, state: WatchLoopState) -> PassFuture<'_> {
        let options = ExecutionOptions::new(2)
            .with_cancellation_token(state.cancellation_token)
            .with_request_run(state.request_run);
        Box::pin(async move { Ok(self.manager.execute(options).await?) })
    }
}

#[tokio::test]
async fn settled_operation_request_starts_next_pass() {
    with_timeout(async {
        init_tracing();

        let slot: Arc<Mutex<Option<RunnerContext>>> = Arc::new(Mutex::new(None));
        let runner = ScriptedRunner::new("server").keeping_context(Arc::clone(&slot));
        let stats = runner.stats();
        let graph = GraphBuilder::new()
            .runner("server", runner)
            .op("ready")
            .after("ready", "server")
            .build();

        let host = Arc::new(GraphHost {
            manager: ExecutionManager::for_graph(&graph).unwrap(),
        });
        let watch = WatchLoop::new(host);

        let shutdown = CancellationTokenSource::new();
        let mut waits = 0;
        watch
            .run_until_cancelled(&shutdown.token(), || {
                waits += 1;
                if waits == 1 {
                    let context = slot.lock().unwrap().clone().unwrap();
                    context.request_run(Some("restart")).unwrap();
                } else {
                    shutdown.cancel();
                }
            })
            .await
            .unwrap();

        assert_eq!(waits, 2);
        assert_eq!(stats.calls(), 2);
        assert_eq!(stats.first_runs(), 1);
    })
    .await
}
