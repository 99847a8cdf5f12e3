//! Local stand-ins for the log and metrics backends of a real deployment.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::{self, Write};
use std::net::{SocketAddr, UdpSocket};

use oncecache::config::MetricsConfig;
use oncecache::metrics;

/// Discards everything, after it was formatted.
pub struct NoopWriter;

impl Write for NoopWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // keep the formatting code from being optimized away
        let buf = std::hint::black_box(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Points the statsd client at a local UDP socket.
///
/// The returned future drains that socket and has to be spawned on the runtime.
pub fn local_statsd(config: &MetricsConfig) -> io::Result<impl Future<Output = ()> + Send + 'static> {
    let listener = UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0)))?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;

    // the fetcher tag alone is not representative of a real deployment
    let mut tags = BTreeMap::new();
    tags.insert("host".into(), "stresstest".into());
    tags.insert("env".into(), "stresstest".into());
    tags.extend(config.custom_tags.clone());
    metrics::configure_statsd(&config.prefix, addr, tags)?;

    Ok(async move {
        let Ok(listener) = tokio::net::UdpSocket::from_std(listener) else {
            return;
        };
        let mut buf = Vec::with_capacity(1024);
        loop {
            buf.clear();
            if listener.recv_buf(&mut buf).await.is_err() {
                break;
            }
        }
    })
}
