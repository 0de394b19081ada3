//! Loader and chain configuration.

use std::time::Duration;
use thiserror::Error;

/// Tunables of the loader pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Flush whenever a processed block number is a multiple of this value.
    pub batch_size: u64,
    /// Number of historical bundles fetched concurrently.
    pub parallel_file_download_count: usize,
    /// Blocks younger than this are flushed immediately.
    pub flush_staleness: Duration,
    /// Upper bound on a single flush.
    pub flush_timeout: Duration,
    /// Minimum interval between two progress reports.
    pub progress_interval: Duration,
    /// Items withheld by the batch and patch start gate before it opens on its own.
    pub gate_max_hold_off: usize,
    /// Identity announced to the live feed.
    pub live_requester: String,
    /// Number of live blocks buffered while waiting to join the historical stream.
    pub live_buffer_size: usize,
    /// Capacity of the channel between the composed source and the ingestion callback.
    pub channel_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            parallel_file_download_count: 2,
            flush_staleness: Duration::from_secs(25),
            flush_timeout: Duration::from_secs(60),
            progress_interval: Duration::from_secs(5),
            gate_max_hold_off: 1_000,
            live_requester: "blockloader".to_string(),
            live_buffer_size: 300,
            channel_size: 256,
        }
    }
}

impl LoaderConfig {
    /// Sets the batch size.
    pub const fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the number of bundles fetched concurrently.
    pub const fn with_parallel_file_download_count(mut self, count: usize) -> Self {
        self.parallel_file_download_count = count;
        self
    }

    /// Sets the staleness threshold under which blocks are flushed immediately.
    pub const fn with_flush_staleness(mut self, staleness: Duration) -> Self {
        self.flush_staleness = staleness;
        self
    }

    /// Sets the flush timeout.
    pub const fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Sets the progress report interval.
    pub const fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the identity announced to the live feed.
    pub fn with_live_requester(mut self, requester: impl Into<String>) -> Self {
        self.live_requester = requester.into();
        self
    }

    /// Checks the configuration for values the pipeline cannot run with.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.parallel_file_download_count == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        if self.live_buffer_size == 0 {
            return Err(ConfigError::ZeroLiveBuffer);
        }
        if self.channel_size == 0 {
            return Err(ConfigError::ZeroChannelSize);
        }
        Ok(())
    }
}

/// Protocol constants of the chain being loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConfig {
    /// Height of the genesis block.
    pub genesis_block_num: u64,
    /// First block a source can stream. Its parent is the genesis block.
    pub first_streamable_block: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self { genesis_block_num: 0, first_streamable_block: 1 }
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The batch size is zero.
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    /// The parallel download count is zero.
    #[error("parallel file download count must be greater than zero")]
    ZeroParallelism,
    /// The live buffer size is zero.
    #[error("live buffer size must be greater than zero")]
    ZeroLiveBuffer,
    /// The source channel size is zero.
    #[error("channel size must be greater than zero")]
    ZeroChannelSize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config_is_valid() {
        let config = LoaderConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.flush_staleness, Duration::from_secs(25));
        assert_eq!(config.flush_timeout, Duration::from_secs(60));
        assert_eq!(config.gate_max_hold_off, 1_000);
        assert_eq!(config.live_buffer_size, 300);
    }

    #[rstest]
    #[case::batch(LoaderConfig { batch_size: 0, ..Default::default() }, ConfigError::ZeroBatchSize)]
    #[case::parallelism(
        LoaderConfig { parallel_file_download_count: 0, ..Default::default() },
        ConfigError::ZeroParallelism
    )]
    #[case::live_buffer(
        LoaderConfig { live_buffer_size: 0, ..Default::default() },
        ConfigError::ZeroLiveBuffer
    )]
    #[case::channel(
        LoaderConfig { channel_size: 0, ..Default::default() },
        ConfigError::ZeroChannelSize
    )]
    fn test_invalid_config(#[case] config: LoaderConfig, #[case] expected: ConfigError) {
        assert_eq!(config.validate(), Err(expected));
    }

    #[test]
    fn test_default_chain_config() {
        let chain = ChainConfig::default();
        assert_eq!(chain.genesis_block_num, 0);
        assert_eq!(chain.first_streamable_block, 1);
    }
}
