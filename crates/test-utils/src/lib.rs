//! Shared helpers for opgraph integration tests.
//!
//! - [`builders`]: build graphs by operation name.
//! - [`runners`]: scripted runners that count, log and misbehave on demand.

pub mod builders;
pub mod runners;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

static TRACING: Once = Once::new();

/// Default deadline for [`with_timeout`].
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a capturing subscriber once per test binary.
///
/// Output is only shown for failing tests (or with `--nocapture`). The filter
/// is read from `OPGRAPH_LOG`, like the binary, and defaults to `info`:
/// `OPGRAPH_LOG=opgraph::dag=trace cargo test --test reentrancy`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env("OPGRAPH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

        // Another harness may have installed one already.
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Fail the test instead of hanging when `f` deadlocks.
///
/// Uses Tokio time, so under `start_paused` it measures simulated time and
/// should not wrap tests that wait on timers on purpose.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("test did not finish within {TEST_TIMEOUT:?}"),
    }
}
