//! Flush policy.

use crate::{Block, CommitTarget, LoaderError, LoaderResult, Metrics};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Decides when buffered writes are committed, and bounds each commit in time.
///
/// A block triggers a flush when its number is a multiple of the batch size, or when it is
/// younger than the staleness threshold. The latter keeps a loader following the chain head
/// committed block by block, while a replay of old blocks commits once per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushController {
    batch_size: u64,
    staleness: Duration,
    timeout: Duration,
}

impl FlushController {
    /// Creates a new [`FlushController`].
    pub const fn new(batch_size: u64, staleness: Duration, timeout: Duration) -> Self {
        Self { batch_size, staleness, timeout }
    }

    /// Returns true if processing block `number` with `timestamp` should trigger a flush.
    ///
    /// A timestamp ahead of `now`, or too large to represent, counts as fresh.
    pub fn should_flush(&self, number: u64, timestamp: u64, now: SystemTime) -> bool {
        if self.batch_size != 0 && number % self.batch_size == 0 {
            return true;
        }

        UNIX_EPOCH
            .checked_add(Duration::from_secs(timestamp))
            .and_then(|block_time| now.duration_since(block_time).ok())
            .is_none_or(|age| age < self.staleness)
    }

    /// Flushes `target`, failing if it does not complete within the timeout.
    pub async fn flush<C>(&self, target: &C, number: u64) -> LoaderResult<()>
    where
        C: CommitTarget + ?Sized,
    {
        debug!(target: "loader", block_number = number, "Flushing block");

        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, target.flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(LoaderError::Flush(err)),
            Err(_) => Err(LoaderError::FlushTimeout(self.timeout)),
        };
        Metrics::record_flush(start.elapsed(), result.is_ok());

        result
    }

    /// Flushes `target` if `block` calls for it. Returns whether a flush happened.
    ///
    /// A successful flush publishes `block` as the head block.
    pub async fn flush_if_needed<C>(
        &self,
        target: &C,
        block: &Block,
        now: SystemTime,
    ) -> LoaderResult<bool>
    where
        C: CommitTarget + ?Sized,
    {
        if !self.should_flush(block.number, block.timestamp, now) {
            return Ok(false);
        }

        self.flush(target, block.number).await?;
        Metrics::record_head_block_number(block.number);
        Ok(true)
    }
}
