//! The storage contract consumed by the fetcher.
//!
//! Storage, eviction and expiry enforcement all live behind [`CacheStore`]. The fetcher only ever
//! reads entries and writes freshly produced ones.

use std::sync::Arc;
use std::time::Duration;

/// How long a stored entry should live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Ttl {
    /// Use whatever default the store is configured with.
    #[default]
    Default,
    /// Expire the entry after the given duration.
    After(Duration),
}

impl Ttl {
    /// Resolves this TTL against the store's default.
    ///
    /// `None` means the entry does not expire.
    pub fn or_default(self, default: Option<Duration>) -> Option<Duration> {
        match self {
            Self::Default => default,
            Self::After(ttl) => Some(ttl),
        }
    }
}

impl From<Duration> for Ttl {
    /// A zero duration is the "use store default" sentinel.
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Self::Default
        } else {
            Self::After(ttl)
        }
    }
}

impl From<Option<Duration>> for Ttl {
    fn from(ttl: Option<Duration>) -> Self {
        ttl.map_or(Self::Default, Self::from)
    }
}

/// A key/value store with per-entry expiration.
///
/// Implementations must tolerate concurrent `get`/`set` from any thread. Failures of the
/// underlying storage are the store's own business: a failing `get` is a miss and a failing
/// `set` is silently dropped.
pub trait CacheStore<V>: Send + Sync {
    /// Looks up `key`, returning `None` on a miss or an expired entry.
    fn get(&self, key: &str) -> Option<V>;

    /// Stores `value` under `key`, replacing any existing entry.
    fn set(&self, key: &str, value: V, ttl: Ttl);

    /// Removes the entry for `key`, if any.
    fn remove(&self, key: &str);
}

impl<V, S: CacheStore<V> + ?Sized> CacheStore<V> for Arc<S> {
    fn get(&self, key: &str) -> Option<V> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: V, ttl: Ttl) {
        (**self).set(key, value, ttl)
    }

    fn remove(&self, key: &str) {
        (**self).remove(key)
    }
}
