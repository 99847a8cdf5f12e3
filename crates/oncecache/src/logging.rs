//! Logging and error reporting for binaries embedding the fetcher.

use std::env;

use sentry::integrations::tracing::{EventFilter, SentryLayer};
use tracing::Metadata;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};

/// The filter directives used when `RUST_LOG` is not set.
///
/// Levels more verbose than `info` only apply to our own crates.
fn default_filter(level: LevelFilter) -> String {
    if level <= LevelFilter::INFO {
        level.to_string()
    } else {
        format!("info,oncecache={level},oncecache_stress={level}")
    }
}

/// Maps tracing events to sentry.
///
/// Every fetch emits `trace` and `debug` events, which are dropped. Failed loads reported by
/// [`LogErrors`](crate::LogErrors) are `warn` and end up as breadcrumbs. Panicking producers are
/// logged at `error` and become events.
fn sentry_event_filter(metadata: &Metadata<'_>) -> EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR => EventFilter::Event,
        tracing::Level::WARN | tracing::Level::INFO => EventFilter::Breadcrumb,
        tracing::Level::DEBUG | tracing::Level::TRACE => EventFilter::Ignore,
    }
}

fn sentry_layer<S>() -> SentryLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    sentry::integrations::tracing::layer()
        .event_filter(sentry_event_filter)
        // only the `fetch` spans are interesting as transaction children
        .span_filter(|metadata| metadata.target().starts_with("oncecache"))
}

/// Initializes sentry if [`sentry_dsn`](Config::sentry_dsn) is configured.
///
/// Events are flushed when the returned guard is dropped.
pub fn init_sentry(config: &Config, traces_sample_rate: f32) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.clone()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            traces_sample_rate,
            ..Default::default()
        },
    )))
}

/// Initializes logging, writing formatted lines to `make_writer`.
///
/// `RUST_LOG` takes precedence over the configured level. `RUST_BACKTRACE` is forced on if
/// [`enable_backtraces`](crate::config::LoggingConfig::enable_backtraces) is set.
///
/// # Safety
/// This function uses [`std::env::set_var`] to modify the environment. That function is only safe
/// to call in single-threaded contexts to prevent unsynchronized concurrent access to the environment.
pub unsafe fn init_logging<W>(config: &Config, make_writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    if config.logging.enable_backtraces {
        // SAFETY: As documented, this function may only be called in a single-threaded context.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let filter =
        env::var("RUST_LOG").unwrap_or_else(|_| default_filter(config.logging.level));

    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(make_writer);
    let fmt_layer = match (config.logging.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => layer.pretty().boxed(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            layer.compact().with_ansi(false).boxed()
        }
        (LogFormat::Json, _) => layer
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(EnvFilter::new(filter)))
        .with(sentry_layer())
        .init();
}

/// Logs an error to the configured logger or `stderr` if not yet configured.
pub fn ensure_log_error(error: &anyhow::Error) {
    if tracing::Level::ERROR <= tracing::level_filters::STATIC_MAX_LEVEL
        && tracing::Level::ERROR <= LevelFilter::current()
    {
        tracing::error!("{:?}", error);
    } else {
        eprintln!("{error:?}");
    }
}
