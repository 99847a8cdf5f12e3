use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use oncecache::config::{Config, LogFormat};

use crate::sinks::NoopWriter;
use crate::stresstest::perform_stresstest;
use crate::workloads::WorkloadsConfig;

mod sinks;
mod stresstest;
mod workloads;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Send metrics to a local sink, exercising the statsd client.
    #[arg(long)]
    metrics: bool,

    /// Format every log line as JSON and discard it, like production logging would.
    #[arg(long)]
    tracing: bool,
}

fn main() {
    if let Err(error) = execute() {
        oncecache::logging::ensure_log_error(&error);
        std::process::exit(1);
    }
}

fn execute() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads_file =
        std::fs::File::open(&cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;
    let mut service_config = Config::get(cli.config.as_deref())?;

    if cli.tracing {
        service_config.logging.format = LogFormat::Json;
        // SAFETY: no other threads have been spawned yet.
        unsafe { oncecache::logging::init_logging(&service_config, || NoopWriter) };
    } else {
        // SAFETY: see above.
        unsafe { oncecache::logging::init_logging(&service_config, std::io::stdout) };
    }

    let _sentry = oncecache::logging::init_sentry(&service_config, 1.0);

    let statsd_sink = if cli.metrics {
        Some(sinks::local_statsd(&service_config.metrics)?)
    } else {
        oncecache::metrics::configure(&service_config.metrics)?;
        None
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let _guard = runtime.enter();
    if let Some(statsd_sink) = statsd_sink {
        runtime.spawn(statsd_sink);
    }

    runtime.block_on(perform_stresstest(service_config, workloads, cli.duration))
}
