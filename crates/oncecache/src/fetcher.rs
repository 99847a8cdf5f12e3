use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;

use crate::computations::{Computations, InFlight, Participation};
use crate::error::{BoxError, FetchError, LoadError};
use crate::handler::ErrorHandler;
use crate::store::{CacheStore, Ttl};

/// Where the value of a fetch came from.
#[derive(Debug, Clone)]
pub enum Fetch<V> {
    /// The store already had the value.
    Hit(V),
    /// This caller ran the producer and it succeeded.
    Loaded(V),
    /// Another caller ran the producer, and this caller received its value.
    Coalesced(V),
    /// The producer failed, but the store held a value afterwards.
    ///
    /// That value was written by someone else, for example an [`ErrorHandler`] storing a
    /// fallback or a concurrent unrelated write.
    Recovered { value: V, error: LoadError },
    /// The producer failed and the store has nothing for this key.
    Failed(LoadError),
}

impl<V> Fetch<V> {
    /// Returns the value, if there is one.
    ///
    /// This is the plain "value or nothing" view that does not distinguish a failed computation
    /// from any other reason for a missing value.
    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Hit(value)
            | Self::Loaded(value)
            | Self::Coalesced(value)
            | Self::Recovered { value, .. } => Some(value),
            Self::Failed(_) => None,
        }
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Self::Hit(value)
            | Self::Loaded(value)
            | Self::Coalesced(value)
            | Self::Recovered { value, .. } => Some(value),
            Self::Failed(_) => None,
        }
    }

    /// Returns the error of the producer invocation this fetch took part in, if it failed.
    pub fn error(&self) -> Option<&LoadError> {
        match self {
            Self::Recovered { error, .. } | Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Looks values up in a [`CacheStore`], filling misses through a producer.
///
/// Concurrent fetches for the same key are coalesced: only one of the callers (the initiator)
/// runs its producer, everybody else waits for that outcome. On success, the value is written to
/// the store before any waiter is released. On failure, nothing is written and every participant
/// re-reads the store to find its answer.
///
/// The producer runs on the initiator's own task; nothing is spawned. If the initiator's future
/// is dropped before the producer completes, all waiters are released with
/// [`LoadError::Abandoned`].
pub struct CoalescingFetcher<S, V> {
    name: Arc<str>,
    store: S,
    /// Used for deduplicating concurrent loads.
    computations: Computations<V>,
}

impl<S: Clone, V> Clone for CoalescingFetcher<S, V> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            store: self.store.clone(),
            computations: self.computations.clone(),
        }
    }
}

impl<S: fmt::Debug, V> fmt::Debug for CoalescingFetcher<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingFetcher")
            .field("name", &self.name)
            .field("store", &self.store)
            .field("in-flight loads", &self.computations.in_flight())
            .finish()
    }
}

impl<S, V> CoalescingFetcher<S, V>
where
    S: CacheStore<V>,
    V: Clone,
{
    pub fn new(store: S) -> Self {
        Self {
            name: Arc::from("default"),
            store,
            computations: Computations::default(),
        }
    }

    /// Sets the name used to tag metrics.
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The number of keys with a load currently in flight.
    pub fn in_flight(&self) -> usize {
        self.computations.in_flight()
    }

    /// Returns the value for `key`, loading it with `producer` on a miss.
    ///
    /// `None` means no value is available, either because the producer failed and the store is
    /// still empty, or for any other reason. Use [`fetch`](Self::fetch) to tell these apart.
    ///
    /// # Errors
    ///
    /// Fails with [`FetchError::InvalidArgument`] for an empty key, without touching the store.
    pub async fn get_or_load<F, Fut, E, H>(
        &self,
        key: &str,
        ttl: impl Into<Ttl>,
        producer: F,
        on_error: H,
    ) -> Result<Option<V>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Into<BoxError>,
        H: ErrorHandler<S>,
    {
        let fetch = self.fetch(key, ttl, producer, on_error).await?;
        Ok(fetch.into_value())
    }

    /// Returns the value for `key` together with where it came from.
    ///
    /// This first looks into the store. On a miss, it either joins a load already in flight for
    /// `key`, or runs `producer` itself. `ttl` is handed to the store when the produced value is
    /// written. `on_error` runs once per failed producer invocation, on the initiator only.
    ///
    /// # Errors
    ///
    /// Fails with [`FetchError::InvalidArgument`] for an empty key, without touching the store.
    /// Producer failures are not errors of this function, see [`Fetch::Failed`].
    #[tracing::instrument(skip_all, fields(fetcher = %self.name, key = %key))]
    pub async fn fetch<F, Fut, E, H>(
        &self,
        key: &str,
        ttl: impl Into<Ttl>,
        producer: F,
        on_error: H,
    ) -> Result<Fetch<V>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Into<BoxError>,
        H: ErrorHandler<S>,
    {
        if key.is_empty() {
            return Err(FetchError::InvalidArgument("cache key must not be empty"));
        }

        let name = &*self.name;
        metric!(counter("fetch.access") += 1, "fetcher" => name);

        if let Some(value) = self.store.get(key) {
            metric!(counter("fetch.store.hit") += 1, "fetcher" => name);
            return Ok(Fetch::Hit(value));
        }
        metric!(counter("fetch.store.miss") += 1, "fetcher" => name);

        let error = match self.computations.join_or_start(key) {
            Participation::Waiter(channel) => {
                // A concurrent load was deduplicated.
                metric!(counter("fetch.channel.hit") += 1, "fetcher" => name);
                tracing::trace!("Waiting for in-flight load");

                match channel.await {
                    Ok(Ok(value)) => return Ok(Fetch::Coalesced(value)),
                    Ok(Err(error)) => error,
                    Err(_canceled) => LoadError::Abandoned,
                }
            }
            Participation::Initiator(in_flight) => {
                metric!(counter("fetch.channel.miss") += 1, "fetcher" => name);

                // A load for this key may have completed between our store lookup and
                // registering as initiator.
                if let Some(value) = self.store.get(key) {
                    metric!(counter("fetch.store.hit") += 1, "fetcher" => name);
                    in_flight.complete(Ok(value.clone()));
                    return Ok(Fetch::Hit(value));
                }

                match self
                    .load(key, ttl.into(), producer, &on_error, in_flight)
                    .await
                {
                    Ok(value) => return Ok(Fetch::Loaded(value)),
                    Err(error) => error,
                }
            }
        };

        // The load failed for everybody involved, so the store has the final word.
        Ok(match self.store.get(key) {
            Some(value) => {
                metric!(counter("fetch.recovered") += 1, "fetcher" => name);
                Fetch::Recovered { value, error }
            }
            None => Fetch::Failed(error),
        })
    }

    /// Runs the producer as the initiator of a load and delivers the outcome.
    ///
    /// The store write on success and the error handler on failure both happen before the
    /// waiters are released.
    async fn load<F, Fut, E, H>(
        &self,
        key: &str,
        ttl: Ttl,
        producer: F,
        on_error: &H,
        in_flight: InFlight<V>,
    ) -> Result<V, LoadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Into<BoxError>,
        H: ErrorHandler<S>,
    {
        let name = &*self.name;
        tracing::trace!("Running producer");

        let start = Instant::now();
        // Calling the producer inside the future also catches panics of the call itself.
        let result = AssertUnwindSafe(async move { producer().await })
            .catch_unwind()
            .await;
        let result = match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(LoadError::producer(err)),
            Err(payload) => {
                let error = LoadError::from_panic(payload);
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "Producer panicked"
                );
                Err(error)
            }
        };

        metric!(timer("fetch.producer.duration") = start.elapsed(), "fetcher" => name);
        metric!(
            counter("fetch.producer") += 1,
            "fetcher" => name,
            "status" => match &result {
                Ok(_) => "ok",
                Err(error) => error.metrics_tag(),
            },
        );

        match &result {
            Ok(value) => self.store.set(key, value.clone(), ttl),
            Err(error) => on_error.handle_error(&self.store, key, error),
        }

        tracing::debug!(success = result.is_ok(), "Delivering load outcome");
        in_flight.complete(result.clone());

        result
    }
}
