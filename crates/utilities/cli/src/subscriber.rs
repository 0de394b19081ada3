//! Tracing subscriber setup.

use crate::CliResult;
use tracing_subscriber::{
    EnvFilter, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Maps a verbosity count to the default log level.
pub const fn verbosity_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global tracing subscriber.
///
/// Without an explicit `filter`, `RUST_LOG` directives apply on top of the level derived from
/// `verbosity`.
pub fn init_tracing_subscriber(verbosity: u8, filter: Option<EnvFilter>) -> CliResult<()> {
    let filter = filter.unwrap_or_else(|| {
        EnvFilter::builder()
            .with_default_directive(verbosity_level(verbosity).into())
            .from_env_lossy()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;
    Ok(())
}
