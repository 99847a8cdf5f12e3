//! Statsd reporting of the `fetch.*` metrics.
//!
//! Nothing is emitted until [`configure`] or [`configure_statsd`] installed a client.
use std::collections::BTreeMap;
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::OnceLock;

use cadence::{Metric, MetricBuilder, StatsdClient, UdpMetricSink};

use crate::config::MetricsConfig;

static METRICS_CLIENT: OnceLock<MetricsClient> = OnceLock::new();

#[doc(hidden)]
pub mod prelude {
    pub use cadence::prelude::*;
}

#[derive(Debug)]
pub struct MetricsClient {
    statsd: StatsdClient,
    /// The configured custom tags, sent next to the per-metric ones.
    tags: BTreeMap<String, String>,
}

impl MetricsClient {
    pub fn statsd(&self) -> &StatsdClient {
        &self.statsd
    }

    #[inline(always)]
    pub fn send<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (tag, value) in &self.tags {
            metric = metric.with_tag(tag, value);
        }
        metric.send()
    }
}

/// Reports metrics to the statsd server in `config`, if there is one.
pub fn configure(config: &MetricsConfig) -> io::Result<()> {
    match &config.statsd {
        Some(host) => configure_statsd(&config.prefix, host.as_str(), config.custom_tags.clone()),
        None => {
            tracing::debug!("No statsd server configured, metrics are disabled");
            Ok(())
        }
    }
}

/// Reports metrics to the statsd server at `host`, tagging each with `tags`.
///
/// Only the first successful call installs a client, later calls are ignored.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    tags: BTreeMap<String, String>,
) -> io::Result<()> {
    let addrs: Vec<_> = host.to_socket_addrs()?.collect();
    let Some(addr) = addrs.first() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "statsd host did not resolve to any address",
        ));
    };
    tracing::info!("Reporting metrics to statsd at {}", addr);

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;
    let sink = UdpMetricSink::from(&addrs[..], socket).map_err(io::Error::other)?;
    let client = MetricsClient {
        statsd: StatsdClient::from_sink(prefix, sink),
        tags,
    };

    if METRICS_CLIENT.set(client).is_err() {
        tracing::warn!("statsd client was already configured");
    }
    Ok(())
}

#[doc(hidden)]
#[inline(always)]
pub fn with_client<F>(f: F)
where
    F: FnOnce(&MetricsClient),
{
    if let Some(client) = METRICS_CLIENT.get() {
        f(client)
    }
}

/// Emits a counter or timer metric.
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send(client.statsd().count_with_tags($id, $value) $(.with_tag($k, $v))*);
        })
    }};

    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send(client.statsd().time_with_tags($id, $value) $(.with_tag($k, $v))*);
        })
    }};
}
