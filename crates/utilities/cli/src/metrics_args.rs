//! Metrics flags.

use crate::{PrometheusError, init_prometheus_server};
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Prometheus exporter flags.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct MetricsArgs {
    /// Serve Prometheus metrics.
    #[arg(long = "metrics.enabled", env = "BLOCKLOADER_METRICS_ENABLED")]
    pub enabled: bool,
    /// Address the metrics server listens on.
    #[arg(long = "metrics.addr", default_value = "0.0.0.0", env = "BLOCKLOADER_METRICS_ADDR")]
    pub addr: IpAddr,
    /// Port the metrics server listens on. 0 picks a free port.
    #[arg(long = "metrics.port", default_value_t = 9090, env = "BLOCKLOADER_METRICS_PORT")]
    pub port: u16,
}

impl Default for MetricsArgs {
    fn default() -> Self {
        Self { enabled: false, addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 9090 }
    }
}

impl MetricsArgs {
    /// Starts the exporter if enabled and registers the loader metrics.
    ///
    /// Returns the address metrics are served on.
    pub fn init_metrics(&self) -> Result<Option<SocketAddr>, PrometheusError> {
        if !self.enabled {
            return Ok(None);
        }
        let addr = init_prometheus_server(SocketAddr::new(self.addr, self.port))?;
        blockloader::Metrics::init();
        Ok(Some(addr))
    }
}
