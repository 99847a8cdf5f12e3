use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use oncecache::handler::from_fn;
use oncecache::{BoxError, CacheStore, Fetch, IgnoreErrors, LoadError, Ttl};

use crate::utils::{Calls, CountingStore, Producer, TTL, TestError, fetcher, setup};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_error_handler_runs_once_for_coalesced_failure() {
    setup();
    let fetcher = fetcher();
    let producer = Producer::new().with_delay(Duration::from_millis(100));
    let handled = Calls::default();

    let tasks = (0..8).map(|_| {
        let fetcher = Arc::clone(&fetcher);
        let producer = producer.err::<String>("backend down");
        let handled = handled.clone();
        tokio::spawn(async move {
            let on_error = from_fn(move |_: &CountingStore, _: &str, _: &LoadError| {
                handled.record();
            });
            fetcher.fetch("k", TTL, producer, on_error).await.unwrap()
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect();

    assert_eq!(producer.calls(), 1);
    assert_eq!(handled.get(), 1);
    assert_eq!(fetcher.store().sets(), 0);

    // every participant sees the very same failure
    for result in &results {
        let error = match result {
            Fetch::Failed(error) => error,
            other => panic!("expected a failed fetch, got {other:?}"),
        };
        let source = error.producer_error().unwrap();
        assert_eq!(source.downcast_ref::<TestError>(), Some(&TestError("backend down".into())));
    }
}

#[tokio::test]
async fn test_handler_sees_the_producer_error() {
    setup();
    let fetcher = fetcher();
    let producer = Producer::new();
    let handled = Calls::default();

    let on_error = {
        let handled = handled.clone();
        from_fn(move |_: &CountingStore, key: &str, error: &LoadError| {
            assert_eq!(key, "k");
            assert_eq!(error.to_string(), "producer failed: quota exceeded");
            handled.record();
        })
    };

    let value = fetcher
        .get_or_load("k", TTL, producer.err::<String>("quota exceeded"), on_error)
        .await
        .unwrap();
    assert_eq!(value, None);
    assert_eq!(handled.get(), 1);
}

#[tokio::test]
async fn test_panic_releases_waiters() {
    setup();
    let fetcher = fetcher();
    let producer = Producer::new().with_delay(Duration::from_millis(50));
    let handled = Calls::default();
    let on_error = {
        let handled = handled.clone();
        from_fn(move |_: &CountingStore, _: &str, error: &LoadError| {
            assert!(matches!(error, LoadError::Panicked(_)));
            handled.record();
        })
    };

    let (first, second) = tokio::join!(
        fetcher.fetch("k", TTL, producer.panic::<String>("kaboom"), &on_error),
        fetcher.fetch("k", TTL, producer.ok("unused".to_owned()), &on_error),
    );

    for result in [first.unwrap(), second.unwrap()] {
        match result {
            Fetch::Failed(LoadError::Panicked(message)) => assert_eq!(message, "kaboom"),
            other => panic!("expected a panicked load, got {other:?}"),
        }
    }
    assert_eq!(producer.calls(), 1);
    assert_eq!(handled.get(), 1);
    assert_eq!(fetcher.in_flight(), 0);

    // the key is usable again afterwards
    let value = fetcher
        .get_or_load("k", TTL, producer.ok("fine".to_owned()), IgnoreErrors)
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("fine"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_initiator_releases_waiters() {
    setup();
    let fetcher = fetcher();
    let producer = Producer::new().with_delay(Duration::from_secs(10));

    let initiator = {
        let fetcher = Arc::clone(&fetcher);
        let producer = producer.ok("never".to_owned());
        tokio::spawn(async move { fetcher.fetch("k", TTL, producer, IgnoreErrors).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.in_flight(), 1);

    let waiter = {
        let fetcher = Arc::clone(&fetcher);
        let producer = producer.ok("unused".to_owned());
        tokio::spawn(async move { fetcher.fetch("k", TTL, producer, IgnoreErrors).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    initiator.abort();
    assert!(initiator.await.unwrap_err().is_cancelled());

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should be released")
        .unwrap()
        .unwrap();
    assert!(matches!(result, Fetch::Failed(LoadError::Abandoned)));
    assert_eq!(producer.calls(), 1);
    assert_eq!(fetcher.in_flight(), 0);
}

#[tokio::test]
async fn test_fallback_written_by_handler_is_returned() {
    setup();
    let fetcher = fetcher();
    let producer = Producer::new().with_delay(Duration::from_millis(50));
    let on_error = from_fn(|store: &CountingStore, key: &str, _: &LoadError| {
        store.set(key, "fallback".to_owned(), Ttl::After(Duration::from_secs(1)));
    });

    let (first, second) = tokio::join!(
        fetcher.fetch("k", TTL, producer.err::<String>("backend down"), &on_error),
        fetcher.fetch("k", TTL, producer.err::<String>("backend down"), &on_error),
    );

    for result in [first.unwrap(), second.unwrap()] {
        match result {
            Fetch::Recovered { value, error } => {
                assert_eq!(value, "fallback");
                assert!(error.producer_error().is_some());
            }
            other => panic!("expected a recovered fetch, got {other:?}"),
        }
    }
    assert_eq!(producer.calls(), 1);
    assert_eq!(fetcher.store().sets(), 1);
}

#[tokio::test]
async fn test_producer_timeout_is_a_failure() {
    setup();
    let fetcher = fetcher();
    let slow = Producer::new().with_delay(Duration::from_secs(10));
    let producer = slow.ok("late".to_owned());

    let result = fetcher
        .fetch(
            "k",
            TTL,
            || async move {
                match tokio::time::timeout(Duration::from_millis(20), producer()).await {
                    Ok(result) => result.map_err(BoxError::from),
                    Err(elapsed) => Err(BoxError::from(elapsed)),
                }
            },
            IgnoreErrors,
        )
        .await
        .unwrap();

    let error = match result {
        Fetch::Failed(error) => error,
        other => panic!("expected a failed fetch, got {other:?}"),
    };
    let source = error.producer_error().unwrap();
    assert!(source.is::<tokio::time::error::Elapsed>());
    assert_eq!(fetcher.store().get("k"), None);
}
