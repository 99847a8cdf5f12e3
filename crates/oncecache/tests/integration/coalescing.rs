use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use oncecache::config::StoreConfig;
use oncecache::{CacheStore, CoalescingFetcher, Fetch, IgnoreErrors, MemoryStore, Ttl};

use crate::utils::{Producer, TTL, fetcher, setup};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_coalesce() {
    setup();
    let fetcher = fetcher();
    let producer = Producer::new().with_delay(Duration::from_millis(50));

    let tasks = (0..10).map(|_| {
        let fetcher = Arc::clone(&fetcher);
        let producer = producer.clone();
        tokio::spawn(async move {
            let result = fetcher
                .fetch("report:7", TTL, producer.ok("data".to_owned()), IgnoreErrors)
                .await
                .unwrap();
            // the value is written through before any participant returns
            assert_eq!(fetcher.store().get("report:7").as_deref(), Some("data"));
            result
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect();

    // we only want to have the actual computation be done a single time
    assert_eq!(producer.calls(), 1);
    let loaded = results
        .iter()
        .filter(|result| matches!(result, Fetch::Loaded(_)))
        .count();
    assert_eq!(loaded, 1);
    for result in results {
        assert_eq!(result.into_value().as_deref(), Some("data"));
    }

    assert_eq!(fetcher.store().sets(), 1);
    assert_eq!(fetcher.in_flight(), 0);
}

#[tokio::test]
async fn test_waiters_receive_the_initiators_value() {
    setup();
    let fetcher = fetcher();
    let producer = Producer::new().with_delay(Duration::from_millis(50));

    // Both futures are polled on the same task, so the first one is guaranteed to start the
    // load and the second one to join it.
    let (first, second) = tokio::join!(
        fetcher.fetch("k", TTL, producer.ok("first".to_owned()), IgnoreErrors),
        fetcher.fetch("k", TTL, producer.ok("second".to_owned()), IgnoreErrors),
    );

    assert!(matches!(first.unwrap(), Fetch::Loaded(value) if value == "first"));
    assert!(matches!(second.unwrap(), Fetch::Coalesced(value) if value == "first"));
    assert_eq!(producer.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrelated_keys_do_not_wait() {
    setup();
    let fetcher = fetcher();
    let slow = Producer::new().with_delay(Duration::from_millis(500));
    let fast = Producer::new();

    let slow_task = {
        let fetcher = Arc::clone(&fetcher);
        let producer = slow.ok("slow".to_owned());
        tokio::spawn(async move {
            fetcher
                .get_or_load("a", TTL, producer, IgnoreErrors)
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.in_flight(), 1);

    let start = Instant::now();
    let value = fetcher
        .get_or_load("b", TTL, fast.ok("fast".to_owned()), IgnoreErrors)
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("fast"));
    assert!(start.elapsed() < Duration::from_millis(250));

    assert_eq!(slow_task.await.unwrap().as_deref(), Some("slow"));
    assert_eq!(fetcher.in_flight(), 0);
}

#[tokio::test]
async fn test_completed_load_is_released() {
    setup();
    let fetcher = fetcher();
    let producer = Producer::new();

    let first = fetcher
        .fetch("k", TTL, producer.ok("one".to_owned()), IgnoreErrors)
        .await
        .unwrap();
    assert!(matches!(first, Fetch::Loaded(_)));
    assert_eq!(fetcher.in_flight(), 0);

    // a hit does not touch the producer
    let second = fetcher
        .fetch("k", TTL, producer.ok("two".to_owned()), IgnoreErrors)
        .await
        .unwrap();
    assert!(matches!(second, Fetch::Hit(value) if value == "one"));
    assert_eq!(producer.calls(), 1);

    // once the entry is gone, a fresh load starts instead of reusing old state
    fetcher.store().remove("k");
    let third = fetcher
        .fetch("k", TTL, producer.ok("three".to_owned()), IgnoreErrors)
        .await
        .unwrap();
    assert!(matches!(third, Fetch::Loaded(value) if value == "three"));
    assert_eq!(producer.calls(), 2);
}

#[tokio::test]
async fn test_failed_load_is_released() {
    setup();
    let fetcher = fetcher();
    let producer = Producer::new();

    let first = fetcher
        .fetch("k", TTL, producer.err("flaky"), IgnoreErrors)
        .await
        .unwrap();
    assert!(matches!(first, Fetch::Failed(_)));
    assert_eq!(fetcher.in_flight(), 0);

    let second = fetcher
        .fetch("k", TTL, producer.ok("recovered".to_owned()), IgnoreErrors)
        .await
        .unwrap();
    assert!(matches!(second, Fetch::Loaded(value) if value == "recovered"));
    assert_eq!(producer.calls(), 2);
}

/// A store whose first lookup observes a miss and then stalls before returning it.
struct StallingStore {
    inner: MemoryStore<String>,
    stall: AtomicBool,
}

impl CacheStore<String> for StallingStore {
    fn get(&self, key: &str) -> Option<String> {
        let value = self.inner.get(key);
        if self.stall.swap(false, Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(200));
        }
        value
    }

    fn set(&self, key: &str, value: String, ttl: Ttl) {
        self.inner.set(key, value, ttl)
    }

    fn remove(&self, key: &str) {
        self.inner.remove(key)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stale_miss_does_not_load_twice() {
    setup();
    let store = StallingStore {
        inner: MemoryStore::new(StoreConfig {
            capacity: 16,
            default_ttl: None,
        }),
        stall: AtomicBool::new(true),
    };
    let fetcher = Arc::new(CoalescingFetcher::new(store).with_name("stalling"));
    let producer = Producer::new();

    // The first caller sees a miss, but only acts on it after the second caller
    // has completed a whole load for the same key.
    let slow = {
        let fetcher = Arc::clone(&fetcher);
        let producer = producer.ok("v".to_owned());
        tokio::spawn(async move { fetcher.fetch("k", TTL, producer, IgnoreErrors).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let fast = fetcher
        .fetch("k", TTL, producer.ok("v".to_owned()), IgnoreErrors)
        .await
        .unwrap();
    assert!(matches!(fast, Fetch::Loaded(value) if value == "v"));

    let slow = slow.await.unwrap().unwrap();
    assert!(matches!(slow, Fetch::Hit(value) if value == "v"));
    assert_eq!(producer.calls(), 1);
    assert_eq!(fetcher.in_flight(), 0);
}
