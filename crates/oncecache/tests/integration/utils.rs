use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use oncecache::config::StoreConfig;
use oncecache::{CacheStore, CoalescingFetcher, MemoryStore, Ttl};

pub use oncecache_test::{Calls, Producer, TestError, setup};

/// A TTL long enough to never expire during a test.
pub const TTL: Duration = Duration::from_secs(60);

/// A [`MemoryStore`] that counts how it is accessed.
#[derive(Debug)]
pub struct CountingStore {
    inner: MemoryStore<String>,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(StoreConfig {
                capacity: 1024,
                default_ttl: None,
            }),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

impl CacheStore<String> for CountingStore {
    fn get(&self, key: &str) -> Option<String> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: String, ttl: Ttl) {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl)
    }

    fn remove(&self, key: &str) {
        self.inner.remove(key)
    }
}

pub type TestFetcher = CoalescingFetcher<CountingStore, String>;

pub fn fetcher() -> Arc<TestFetcher> {
    Arc::new(CoalescingFetcher::new(CountingStore::new()).with_name("test"))
}
