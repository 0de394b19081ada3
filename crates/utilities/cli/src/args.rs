//! Loader flags.

use crate::{CliError, CliResult};
use blockloader::{LoaderConfig, PipelineMode};
use clap::{Parser, ValueEnum};

/// Pipeline topology selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LoaderMode {
    /// Resume from the last finalized block and follow the live feed.
    #[default]
    Live,
    /// Replay history from `--start-block` into the database.
    Batch,
    /// Replay history from `--start-block` without writing blocks.
    Patch,
}

impl core::fmt::Display for LoaderMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&PipelineMode::from(*self), f)
    }
}

impl From<LoaderMode> for PipelineMode {
    fn from(mode: LoaderMode) -> Self {
        match mode {
            LoaderMode::Live => Self::Live,
            LoaderMode::Batch => Self::Batch,
            LoaderMode::Patch => Self::Patch,
        }
    }
}

/// Flags configuring the block loader.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct LoaderArgs {
    /// Pipeline mode.
    #[arg(long, value_enum, default_value_t = LoaderMode::Live, env = "BLOCKLOADER_MODE")]
    pub mode: LoaderMode,
    /// First block to load in batch and patch modes.
    #[arg(long, env = "BLOCKLOADER_START_BLOCK")]
    pub start_block: Option<u64>,
    /// Stop right before this block. 0 means never stop.
    #[arg(long, default_value_t = 0, env = "BLOCKLOADER_STOP_BLOCK")]
    pub stop_block: u64,
    /// Flush every time a block number is a multiple of this value.
    #[arg(long, default_value_t = 1, env = "BLOCKLOADER_BATCH_SIZE")]
    pub batch_size: u64,
    /// Number of block bundles downloaded in parallel.
    #[arg(long, default_value_t = 2, env = "BLOCKLOADER_PARALLEL_FILE_DOWNLOAD_COUNT")]
    pub parallel_file_download_count: usize,
    /// Start from the first streamable block when the database holds no irreversible block.
    #[arg(long, env = "BLOCKLOADER_ALLOW_LIVE_ON_EMPTY_TABLE")]
    pub allow_live_on_empty_table: bool,
}

impl Default for LoaderArgs {
    fn default() -> Self {
        Self {
            mode: LoaderMode::Live,
            start_block: None,
            stop_block: 0,
            batch_size: 1,
            parallel_file_download_count: 2,
            allow_live_on_empty_table: false,
        }
    }
}

impl LoaderArgs {
    /// Returns the pipeline mode.
    pub fn pipeline_mode(&self) -> PipelineMode {
        self.mode.into()
    }

    /// Returns the start block of a batch or patch run, `None` in live mode.
    pub fn start_block(&self) -> CliResult<Option<u64>> {
        match (self.mode, self.start_block) {
            (LoaderMode::Live, _) => Ok(None),
            (_, Some(start)) => Ok(Some(start)),
            (mode, None) => Err(CliError::MissingStartBlock(mode)),
        }
    }

    /// Builds the validated [`LoaderConfig`] described by the flags.
    pub fn loader_config(&self) -> CliResult<LoaderConfig> {
        let config = LoaderConfig::default()
            .with_batch_size(self.batch_size)
            .with_parallel_file_download_count(self.parallel_file_download_count);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockloader::ConfigError;
    use rstest::rstest;

    fn parse(args: &[&str]) -> LoaderArgs {
        LoaderArgs::try_parse_from(std::iter::once("blockloader").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        assert_eq!(parse(&[]), LoaderArgs::default());
        assert_eq!(parse(&[]).loader_config().unwrap(), LoaderConfig::default());
    }

    #[rstest]
    #[case::live("live", PipelineMode::Live)]
    #[case::batch("batch", PipelineMode::Batch)]
    #[case::patch("patch", PipelineMode::Patch)]
    fn test_mode(#[case] flag: &str, #[case] expected: PipelineMode) {
        assert_eq!(parse(&["--mode", flag, "--start-block", "10"]).pipeline_mode(), expected);
    }

    #[test]
    fn test_invalid_mode_is_rejected() {
        assert!(LoaderArgs::try_parse_from(["blockloader", "--mode", "replay"]).is_err());
    }

    #[test]
    fn test_tuning_flags() {
        let args = parse(&[
            "--mode",
            "batch",
            "--start-block",
            "1000",
            "--stop-block",
            "2000",
            "--batch-size",
            "100",
            "--parallel-file-download-count",
            "8",
        ]);

        assert_eq!(args.start_block().unwrap(), Some(1_000));
        assert_eq!(args.stop_block, 2_000);
        let config = args.loader_config().unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.parallel_file_download_count, 8);
    }

    #[rstest]
    #[case::batch(LoaderMode::Batch)]
    #[case::patch(LoaderMode::Patch)]
    fn test_bounded_modes_require_start_block(#[case] mode: LoaderMode) {
        let args = LoaderArgs { mode, ..Default::default() };
        assert!(matches!(args.start_block(), Err(CliError::MissingStartBlock(m)) if m == mode));
    }

    #[test]
    fn test_live_ignores_start_block() {
        let args = LoaderArgs { start_block: Some(5), ..Default::default() };
        assert_eq!(args.start_block().unwrap(), None);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let args = parse(&["--batch-size", "0"]);
        assert!(matches!(args.loader_config(), Err(CliError::Config(ConfigError::ZeroBatchSize))));
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(LoaderMode::Patch.to_string(), "patch");
    }
}
