//! Strategies for observing failed producer invocations.

use crate::error::LoadError;

/// Observes a failed producer invocation.
///
/// The handler runs exactly once per failed invocation, on the caller that ran the producer, and
/// before any coalesced caller is released. It is handed the store so it can write a fallback
/// value: every participant re-reads the store after a failure, so such a fallback is what they
/// will all return.
pub trait ErrorHandler<S: ?Sized> {
    fn handle_error(&self, store: &S, key: &str, error: &LoadError);
}

/// Does nothing with errors.
#[derive(Clone, Copy, Debug, Default)]
pub struct IgnoreErrors;

impl<S: ?Sized> ErrorHandler<S> for IgnoreErrors {
    fn handle_error(&self, _store: &S, _key: &str, _error: &LoadError) {}
}

/// Logs errors at `warn` level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogErrors;

impl<S: ?Sized> ErrorHandler<S> for LogErrors {
    fn handle_error(&self, _store: &S, key: &str, error: &LoadError) {
        tracing::warn!(error = error as &dyn std::error::Error, key, "Failed to load value");
    }
}

impl<S: ?Sized, H: ErrorHandler<S> + ?Sized> ErrorHandler<S> for &H {
    fn handle_error(&self, store: &S, key: &str, error: &LoadError) {
        (**self).handle_error(store, key, error)
    }
}

/// An [`ErrorHandler`] created by [`from_fn`].
#[derive(Clone, Copy, Debug)]
pub struct FnHandler<F>(F);

impl<S: ?Sized, F> ErrorHandler<S> for FnHandler<F>
where
    F: Fn(&S, &str, &LoadError),
{
    fn handle_error(&self, store: &S, key: &str, error: &LoadError) {
        (self.0)(store, key, error)
    }
}

/// Creates an [`ErrorHandler`] from a closure.
pub fn from_fn<S: ?Sized, F>(f: F) -> FnHandler<F>
where
    F: Fn(&S, &str, &LoadError),
{
    FnHandler(f)
}
