#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod args;
pub use args::{LoaderArgs, LoaderMode};

pub mod backtrace;

mod error;
pub use error::{CliError, CliResult, PrometheusError};

mod log;
pub use log::LogArgs;

mod metrics_args;
pub use metrics_args::MetricsArgs;

mod prometheus;
pub use prometheus::init_prometheus_server;

mod signal;
pub use signal::shutdown_on_signal;

mod subscriber;
pub use subscriber::{init_tracing_subscriber, verbosity_level};
