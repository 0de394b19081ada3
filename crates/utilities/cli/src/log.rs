//! Logging flags.

use crate::{CliResult, init_tracing_subscriber};
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

/// Logging flags.
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
pub struct LogArgs {
    /// Verbosity level (0-2).
    #[arg(long = "verbosity", short = 'v', action = ArgAction::Count, global = true)]
    pub v: u8,
    /// Filter directives, overriding the verbosity level.
    #[arg(long = "log-filter", env = "RUST_LOG", global = true)]
    pub filter: Option<String>,
}

impl LogArgs {
    /// Installs the global tracing subscriber.
    pub fn init_tracing(&self) -> CliResult<()> {
        let filter = self.filter.as_deref().map(EnvFilter::new);
        init_tracing_subscriber(self.v, filter)
    }
}
