//! Shared test harness for replayflow integration tests.
//!
//! Features:
//! - [`engine_test!`] for multi-threaded async tests returning `anyhow::Result`.
//! - Idempotent tracing setup, filtered to replayflow at debug level.
//! - A polling helper for conditions reached by background processors.

use std::future::Future;
use std::time::Duration;

use anyhow::{Result, anyhow};

/// Initialize tracing for tests. Safe to call multiple times.
///
/// `RUST_LOG` overrides the default `replayflow=debug` filter.
pub fn init_test_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "replayflow=debug".to_owned());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Poll until `check` returns `Some(T)` or `timeout` expires.
pub async fn wait_until<F, Fut, T>(timeout: Duration, interval: Duration, check: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(result) = check().await? {
            return Ok(result);
        }

        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("timeout waiting for condition"));
        }

        tokio::time::sleep(interval).await;
    }
}

/// Macro to define an async engine test.
///
/// Usage:
///
/// ```ignore
/// use test_utils::engine_test;
///
/// engine_test!(workflow_completes, {
///     let app = TestApp::new();
///     app.drain().await?;
///     Ok(())
/// });
/// ```
///
/// This expands to:
/// - `#[tokio::test(flavor = "multi_thread")]`
/// - tracing initialization
/// - an `async fn` returning `anyhow::Result<()>` that runs the body
#[macro_export]
macro_rules! engine_test {
    ($name:ident, $body:block) => {
        #[tokio::test(flavor = "multi_thread")]
        async fn $name() -> anyhow::Result<()> {
            $crate::init_test_tracing();
            $body
        }
    };
}
