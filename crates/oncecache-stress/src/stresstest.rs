use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use oncecache::config::Config;
use sentry::SentryFutureExt;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{PreparedWorkload, WorkloadsConfig, prepare_workload, process_workload};

pub async fn perform_stresstest(
    service_config: Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    // initialize workloads
    let workloads = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            prepare_workload(i, service_config.store, workload).map(Arc::new)
        })
        .collect::<Result<Vec<_>>>()?;

    // warmup: run each workload once so every store has seen a write
    {
        let start = Instant::now();

        let futures = workloads.iter().map(|workload| {
            let workload = Arc::clone(workload);
            tokio::spawn(async move {
                process_workload(&workload).await;
            })
        });

        let _results = futures::future::join_all(futures).await;

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for workload in workloads.iter() {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let workload = Arc::clone(workload);

        let task = tokio::spawn(async move {
            let concurrency = workload.concurrency;
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let semaphore = Arc::new(Semaphore::new(concurrency as usize));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let workload = Arc::clone(&workload);
                        let task_durations = Arc::clone(&task_durations);
                        let task_start = Instant::now();

                        let hub = sentry::Hub::new_from_top(sentry::Hub::current());
                        let ctx = sentry::TransactionContext::new("stresstest", "stresstest");
                        let transaction = hub.start_transaction(ctx);

                        let future = async move {
                            process_workload(&workload).await;

                            transaction.finish();

                            task_durations
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .add(task_start.elapsed().as_secs_f64());

                            drop(permit);
                        };
                        let future = future.bind_hub(hub);

                        tokio::spawn(future);
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency).await;

            let task_durations: DDSketch = {
                let mut task_durations = task_durations
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *task_durations)
            };

            task_durations
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, (task, workload)) in finished_tasks.into_iter().zip(&workloads).enumerate() {
        let task_durations = task.context("workload task failed")?;
        report(i, workload, &task_durations, duration);
    }

    Ok(())
}

fn report(index: usize, workload: &PreparedWorkload, task_durations: &DDSketch, duration: Duration) {
    let concurrency = workload.concurrency;
    let ops = task_durations.count();
    let ops_ps = ops as f64 / duration.as_secs_f64();
    println!("Workload {index} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");

    if ops > 0 {
        let quantile = |q| {
            let secs = task_durations.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs)
        };
        let avg = Duration::from_secs_f64(task_durations.sum().unwrap_or_default() / ops as f64);
        let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }

    let stats = &workload.stats;
    let load = |counter: &std::sync::atomic::AtomicUsize| counter.load(Ordering::Relaxed);
    println!(
        "  producer invocations: {}; producer failures: {}",
        load(&stats.invocations),
        load(&stats.producer_failures),
    );
    println!(
        "  hits: {}; loaded: {}; coalesced: {}; recovered: {}; failed: {}",
        load(&stats.hits),
        load(&stats.loaded),
        load(&stats.coalesced),
        load(&stats.recovered),
        load(&stats.failed),
    );
}
