use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use oncecache::config::StoreConfig;
use oncecache::{CoalescingFetcher, Fetch, IgnoreErrors, MemoryStore};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

/// A stream of fetches against a single fetcher.
#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    /// The number of distinct keys the fetches are spread over.
    ///
    /// Fewer keys mean more coalescing.
    pub keys: usize,
    /// How long each producer invocation takes.
    #[serde(default, with = "humantime_serde")]
    pub latency: Duration,
    /// The probability of a producer invocation failing, between 0 and 1.
    #[serde(default)]
    pub failure_rate: f64,
    /// The TTL passed along with every fetch. Zero uses the store default.
    #[serde(default, with = "humantime_serde")]
    pub ttl: Duration,
}

pub type StressFetcher = CoalescingFetcher<MemoryStore<Arc<str>>, Arc<str>>;

/// A [`Workload`] ready to be run, with its own fetcher and store.
pub struct PreparedWorkload {
    pub concurrency: u32,
    fetcher: StressFetcher,
    keys: Vec<String>,
    latency: Duration,
    failure_rate: f64,
    ttl: Duration,
    pub stats: Stats,
}

/// Counts of what happened during a workload run.
#[derive(Debug, Default)]
pub struct Stats {
    pub invocations: AtomicUsize,
    pub producer_failures: AtomicUsize,
    pub hits: AtomicUsize,
    pub loaded: AtomicUsize,
    pub coalesced: AtomicUsize,
    pub recovered: AtomicUsize,
    pub failed: AtomicUsize,
}

impl Stats {
    fn record(&self, fetch: &Fetch<Arc<str>>) {
        let counter = match fetch {
            Fetch::Hit(_) => &self.hits,
            Fetch::Loaded(_) => &self.loaded,
            Fetch::Coalesced(_) => &self.coalesced,
            Fetch::Recovered { .. } => &self.recovered,
            Fetch::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn prepare_workload(
    index: usize,
    store: StoreConfig,
    workload: Workload,
) -> Result<PreparedWorkload> {
    ensure!(workload.concurrency > 0, "workload {index}: concurrency must be positive");
    let concurrency = u32::try_from(workload.concurrency)
        .ok()
        .filter(|&permits| permits as usize <= Semaphore::MAX_PERMITS)
        .with_context(|| format!("workload {index}: concurrency is too large"))?;
    ensure!(workload.keys > 0, "workload {index}: needs at least one key");
    ensure!(
        (0.0..=1.0).contains(&workload.failure_rate),
        "workload {index}: failure_rate must be between 0 and 1"
    );

    let fetcher = CoalescingFetcher::new(MemoryStore::new(store))
        .with_name(format!("workload-{index}"));
    let keys = (0..workload.keys)
        .map(|key| format!("workload-{index}:{key}"))
        .collect();

    Ok(PreparedWorkload {
        concurrency,
        fetcher,
        keys,
        latency: workload.latency,
        failure_rate: workload.failure_rate,
        ttl: workload.ttl,
        stats: Stats::default(),
    })
}

/// Runs a single fetch of a random key of the workload.
pub async fn process_workload(workload: &PreparedWorkload) {
    let (key, fail) = {
        let mut rng = rand::rng();
        let key = &workload.keys[rng.random_range(0..workload.keys.len())];
        (key, rng.random_bool(workload.failure_rate))
    };

    let stats = &workload.stats;
    let latency = workload.latency;
    let producer = || async move {
        stats.invocations.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(latency).await;
        if fail {
            stats.producer_failures.fetch_add(1, Ordering::Relaxed);
            return Err(anyhow!("simulated failure for {key}"));
        }
        Ok(Arc::<str>::from(key.as_str()))
    };

    match workload
        .fetcher
        .fetch(key, workload.ttl, producer, IgnoreErrors)
        .await
    {
        Ok(fetch) => stats.record(&fetch),
        // keys are never empty
        Err(_) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
