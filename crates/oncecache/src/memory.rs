use std::fmt;
use std::time::{Duration, Instant};

use crate::config::StoreConfig;
use crate::store::{CacheStore, Ttl};

/// An item saved in the in-memory moka cache.
#[derive(Clone, Debug)]
struct InMemoryItem<V> {
    /// When to evict this item, `None` if it only goes away for capacity.
    deadline: Option<Instant>,
    /// The actual data.
    value: V,
}

/// A struct implementing [`moka::Expiry`] that uses the [`InMemoryItem`] [`Instant`] as the explicit
/// expiration time.
struct ItemExpiration;

/// Returns the duration between the `current_time` and `target_time` in the future.
/// In case the `target_time` is already elapsed (it is in the past relative to `current_time`), this
/// will return `Some(ZERO)`.
fn saturating_duration_since(
    current_time: Instant,
    target_time: Option<Instant>,
) -> Option<Duration> {
    target_time.map(|target_time| {
        target_time
            .checked_duration_since(current_time)
            .unwrap_or_default()
    })
}

impl<V> moka::Expiry<String, InMemoryItem<V>> for ItemExpiration {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &InMemoryItem<V>,
        current_time: Instant,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &InMemoryItem<V>,
        current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline)
    }
}

/// A bounded in-process [`CacheStore`] backed by [`moka`].
///
/// Every entry carries its own deadline, computed at write time from the requested [`Ttl`] or the
/// configured [`default_ttl`](StoreConfig::default_ttl).
#[derive(Clone)]
pub struct MemoryStore<V> {
    cache: moka::sync::Cache<String, InMemoryItem<V>>,
    default_ttl: Option<Duration>,
}

impl<V: Clone + Send + Sync + 'static> MemoryStore<V> {
    pub fn new(config: StoreConfig) -> Self {
        let cache = moka::sync::Cache::builder()
            .max_capacity(config.capacity)
            .expire_after(ItemExpiration)
            .build();

        Self {
            cache,
            default_ttl: config.default_ttl,
        }
    }

    /// The number of entries, including ones that expired but were not swept yet.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl<V: Clone + Send + Sync + 'static> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl<V> fmt::Debug for MemoryStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl<V: Clone + Send + Sync + 'static> CacheStore<V> for MemoryStore<V> {
    fn get(&self, key: &str) -> Option<V> {
        let item = self.cache.get(key)?;
        // moka only sweeps lazily, so double check the deadline ourselves
        match item.deadline {
            Some(deadline) if deadline <= Instant::now() => None,
            _ => Some(item.value),
        }
    }

    fn set(&self, key: &str, value: V, ttl: Ttl) {
        let deadline = ttl
            .or_default(self.default_ttl)
            .and_then(|ttl| Instant::now().checked_add(ttl));
        self.cache
            .insert(key.to_owned(), InMemoryItem { deadline, value });
    }

    fn remove(&self, key: &str) {
        self.cache.invalidate(key);
    }
}
