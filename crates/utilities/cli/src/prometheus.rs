//! Utilities for spinning up a prometheus metrics server.

use crate::PrometheusError;
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_process::Collector;
use std::{
    net::{SocketAddr, TcpListener},
    thread::{self, sleep},
    time::Duration,
};

/// Interval between two collections of process metrics.
const PROCESS_METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Resolves a listen address, asking the OS for a free port when the port is 0.
fn resolve_listen_addr(addr: SocketAddr) -> Result<SocketAddr, PrometheusError> {
    if addr.port() != 0 {
        return Ok(addr);
    }
    let listener = TcpListener::bind(addr)?;
    Ok(listener.local_addr()?)
}

/// Starts a Prometheus metrics server on `addr`, returning the address it serves on.
///
/// Process metrics (CPU, memory, file descriptors) are collected in a background thread.
pub fn init_prometheus_server(addr: SocketAddr) -> Result<SocketAddr, PrometheusError> {
    let addr = resolve_listen_addr(addr)?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    let collector = Collector::default();
    collector.describe();
    thread::spawn(move || {
        loop {
            collector.collect();
            sleep(PROCESS_METRICS_INTERVAL);
        }
    });

    tracing::info!(target: "prometheus", "Serving metrics at: http://{addr}");
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_resolve_listen_addr() {
        let fixed = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9_100);
        assert_eq!(resolve_listen_addr(fixed).unwrap(), fixed);

        let any = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let resolved = resolve_listen_addr(any).unwrap();
        assert_ne!(resolved.port(), 0);
        assert_eq!(resolved.ip(), any.ip());
    }
}
