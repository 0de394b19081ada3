//! Error types for CLI utilities.

use crate::LoaderMode;
use blockloader::{ConfigError, LoaderError};
use metrics_exporter_prometheus::BuildError;
use std::io;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;

/// Error type for prometheus server initialization.
#[derive(Debug, Error)]
pub enum PrometheusError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to address: {0}")]
    Bind(#[from] io::Error),
    /// Failed to build or install the exporter.
    #[error("failed to install prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Errors that can occur in CLI operations.
#[derive(Error, Debug)]
pub enum CliError {
    /// The selected mode needs a start block.
    #[error("--start-block is required in {0} mode")]
    MissingStartBlock(LoaderMode),

    /// The flags describe an invalid loader configuration.
    #[error("invalid loader configuration: {0}")]
    Config(#[from] ConfigError),

    /// Error initializing the tracing subscriber.
    #[error("Failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),

    /// Error initializing metrics.
    #[error("Failed to initialize metrics: {0}")]
    MetricsInitialization(#[from] PrometheusError),

    /// The loader failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),
}

/// Type alias for CLI results.
pub type CliResult<T> = Result<T, CliError>;
