//! Helpers for testing the fetcher.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Producers are `FnOnce` closures. Create them through a [`Producer`] so that the test can
//!    assert afterwards how often the underlying computation actually ran.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `oncecache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("oncecache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// The error returned by failing test producers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TestError(pub String);

/// A shared counter of invocations.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Creates producers that count how often they were invoked.
///
/// Every producer created from the same `Producer` shares one [`Calls`] counter.
#[derive(Debug, Clone, Default)]
pub struct Producer {
    calls: Calls,
    delay: Duration,
}

impl Producer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every produced computation sleep before it resolves.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// How often any of the producers ran.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// A producer resolving to `value`.
    pub fn ok<V>(&self, value: V) -> impl FnOnce() -> BoxedResult<V> + Send + use<V>
    where
        V: Send + 'static,
    {
        self.returning(Ok(value))
    }

    /// A producer failing with a [`TestError`] carrying `message`.
    pub fn err<V>(&self, message: &str) -> impl FnOnce() -> BoxedResult<V> + Send + use<V>
    where
        V: Send + 'static,
    {
        self.returning(Err(TestError(message.to_owned())))
    }

    /// A producer panicking with `message` after the delay.
    pub fn panic<V>(
        &self,
        message: &'static str,
    ) -> impl FnOnce() -> BoxedResult<V> + Send + use<V>
    where
        V: Send + 'static,
    {
        let calls = self.calls.clone();
        let delay = self.delay;
        move || {
            calls.record();
            Box::pin(sleep_then_panic(delay, message))
        }
    }

    fn returning<V>(
        &self,
        result: Result<V, TestError>,
    ) -> impl FnOnce() -> BoxedResult<V> + Send + use<V>
    where
        V: Send + 'static,
    {
        let calls = self.calls.clone();
        let delay = self.delay;
        move || {
            calls.record();
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                result
            })
        }
    }
}

async fn sleep_then_panic<V>(delay: Duration, message: &'static str) -> Result<V, TestError> {
    tokio::time::sleep(delay).await;
    panic!("{message}")
}

/// The future returned by the producers of a [`Producer`].
pub type BoxedResult<V> =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<V, TestError>> + Send + 'static>>;
