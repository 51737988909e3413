// tests/shell_runner.rs
#![cfg(unix)]

use std::fs;
use std::time::Duration;

use opgraph::cancellation::{CancellationToken, CancellationTokenSource};
use opgraph::config::{build_graph, load_and_validate};
use opgraph::dag::OperationStatus;
use opgraph::engine::{ExecutionManager, ExecutionOptions, RunnerContext};
use opgraph::exec::{OperationRunner, ShellRunner};
use opgraph::watch::{WatchDefaults, WatchProfile, WatchSpec};
use opgraph_test_utils::builders::status_of;
use opgraph_test_utils::{init_tracing, with_timeout};

fn context() -> RunnerContext {
    RunnerContext::detached("test", CancellationToken::never())
}

#[tokio::test]
async fn zero_exit_is_success() {
    with_timeout(async {
        init_tracing();
        let runner = ShellRunner::new("ok", "echo hello");
        let status = runner.execute(context()).await.unwrap();
        assert_eq!(status, OperationStatus::Success);
    })
    .await
}

#[tokio::test]
async fn non_zero_exit_is_an_error() {
    with_timeout(async {
        init_tracing();
        let runner = ShellRunner::new("bad", "exit 3");
        let err = runner.execute(context()).await.unwrap_err();
        assert!(err.to_string().contains("status 3"), "{err:#}");
    })
    .await
}

#[tokio::test]
async fn cancellation_kills_the_command() {
    with_timeout(async {
        init_tracing();
        let source = CancellationTokenSource::with_delay(Duration::from_millis(50));
        let runner = ShellRunner::new("slow", "sleep 5");

        let started = std::time::Instant::now();
        let status = runner
            .execute(RunnerContext::detached("slow", source.token()))
            .await
            .unwrap();

        assert_eq!(status, OperationStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(4));
    })
    .await
}

#[tokio::test]
async fn runs_in_working_dir() {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new("touch", "touch marker").with_working_dir(dir.path());

        runner.execute(context()).await.unwrap();
        assert!(dir.path().join("marker").exists());
    })
    .await
}

#[tokio::test]
async fn unchanged_inputs_skip_the_command() {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("input.txt"), "one").unwrap();

        let spec = WatchSpec {
            watch: Some(vec!["*.txt".to_string()]),
            ..WatchSpec::new("count")
        };
        let profile = WatchProfile::compile(&WatchDefaults::default(), &spec).unwrap();
        // Writes outside the watched set so running it does not change the
        // fingerprint.
        let runner = ShellRunner::new("count", "echo x >> runs.log")
            .with_working_dir(dir.path())
            .with_fingerprint(dir.path(), profile);

        assert_eq!(runner.execute(context()).await.unwrap(), OperationStatus::Success);
        assert_eq!(runner.execute(context()).await.unwrap(), OperationStatus::NoOp);

        fs::write(dir.path().join("input.txt"), "two").unwrap();
        assert_eq!(runner.execute(context()).await.unwrap(), OperationStatus::Success);

        let runs = fs::read_to_string(dir.path().join("runs.log")).unwrap();
        assert_eq!(runs.lines().count(), 2);
    })
    .await
}

#[tokio::test]
async fn single_pass_from_config() {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Opgraph.toml");
        fs::write(
            &path,
            r#"
[operation.prepare]
cmd = "mkdir -p out"

[operation.write]
cmd = "echo built > out/result"
after = ["prepare"]

[operation.check]
cmd = "test -f out/missing"
after = ["write"]

[operation.publish]
cmd = "echo never"
after = ["check"]
"#,
        )
        .unwrap();

        let cfg = load_and_validate(&path).unwrap();
        let graph = build_graph(&cfg, dir.path()).unwrap();
        let manager = ExecutionManager::for_graph(&graph).unwrap();

        let status = manager.execute(ExecutionOptions::new(2)).await.unwrap();

        assert_eq!(status, OperationStatus::Failure);
        assert_eq!(status_of(&graph, "prepare"), OperationStatus::Success);
        assert_eq!(status_of(&graph, "write"), OperationStatus::Success);
        assert_eq!(status_of(&graph, "check"), OperationStatus::Failure);
        assert_eq!(status_of(&graph, "publish"), OperationStatus::Blocked);
        assert_eq!(
            fs::read_to_string(dir.path().join("out/result")).unwrap().trim(),
            "built"
        );
    })
    .await
}
