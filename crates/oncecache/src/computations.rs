use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

use crate::error::LoadError;

/// The result of one producer invocation, as seen by everyone who waited on it.
pub(crate) type Outcome<V> = Result<V, LoadError>;

// `Shared` needs a clonable output, which is why the error side is a `LoadError` rather than the
// producer's own error type.
pub(crate) type ComputationChannel<V> = Shared<oneshot::Receiver<Outcome<V>>>;

/// An index of the computations currently in flight, keyed by cache key.
///
/// This only ever holds channels to computations that are still running or are just being
/// delivered, never finished results.
pub(crate) struct Computations<V> {
    inner: Arc<Mutex<HashMap<String, ComputationChannel<V>>>>,
}

impl<V> Clone for Computations<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for Computations<V> {
    fn default() -> Self {
        Self {
            inner: Default::default(),
        }
    }
}

/// How a caller takes part in a computation.
pub(crate) enum Participation<V> {
    /// Another caller is already running the producer; wait for its outcome.
    Waiter(ComputationChannel<V>),
    /// This caller has to run the producer and report back through the handle.
    Initiator(InFlight<V>),
}

impl<V: Clone> Computations<V> {
    /// Joins the computation running for `key`, or registers a new one.
    ///
    /// The check and the registration happen under the same lock, so for any key there is only
    /// ever one [`Participation::Initiator`] alive.
    pub fn join_or_start(&self, key: &str) -> Participation<V> {
        let mut computations = self.lock();
        if let Some(channel) = computations.get(key) {
            return Participation::Waiter(channel.clone());
        }

        let (sender, receiver) = oneshot::channel();
        let evicted = computations.insert(key.to_owned(), receiver.shared());
        debug_assert!(evicted.is_none());

        Participation::Initiator(InFlight {
            key: key.to_owned(),
            sender: Some(sender),
            computations: self.clone(),
        })
    }
}

impl<V> Computations<V> {
    /// The number of keys with a computation in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ComputationChannel<V>>> {
        // The map is never left in an inconsistent state, even by a panicking holder.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle owned by the caller running the producer for a key.
///
/// Dropping it without calling [`complete`](Self::complete) releases all waiters with
/// [`LoadError::Abandoned`]. Either way, the key is removed from the map only after the waiters
/// have been notified, so a late joiner sees either the finished channel or no entry at all.
pub(crate) struct InFlight<V> {
    key: String,
    sender: Option<oneshot::Sender<Outcome<V>>>,
    computations: Computations<V>,
}

impl<V> InFlight<V> {
    /// Delivers the outcome to every waiter and releases the key.
    pub fn complete(mut self, outcome: Outcome<V>) {
        if let Some(sender) = self.sender.take() {
            // all waiters may have gone away already, which is fine
            sender.send(outcome).ok();
        }
    }
}

impl<V> Drop for InFlight<V> {
    fn drop(&mut self) {
        // Dropping the sender cancels the channel for anyone still waiting.
        drop(self.sender.take());
        self.computations.lock().remove(&self.key);
    }
}
