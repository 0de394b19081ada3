use crate::{
    Block, ChainConfig, CommitTarget, FlushController, HealthFlag, LoaderConfig, LoaderError,
    LoaderResult, Metrics, ProgressTracker, Shutter,
};
use std::{
    sync::Arc,
    time::{Instant, SystemTime},
};

/// State owned by the ingestion callback.
///
/// Only the callback mutates it, one delivery at a time. The health flag and the shutter are
/// shared with the [`BlockLoader`](crate::BlockLoader) handle.
#[derive(Debug)]
pub struct IngestState<C> {
    target: Arc<C>,
    flush: FlushController,
    progress: ProgressTracker,
    shutter: Shutter,
    health: HealthFlag,
    chain: ChainConfig,
    stop_block: u64,
    genesis_written: bool,
}

impl<C: CommitTarget> IngestState<C> {
    /// Creates a new [`IngestState`]. A `stop_block` of 0 means unbounded.
    pub fn new(
        target: Arc<C>,
        config: &LoaderConfig,
        chain: ChainConfig,
        shutter: Shutter,
        health: HealthFlag,
        stop_block: u64,
    ) -> Self {
        Self {
            target,
            flush: FlushController::new(
                config.batch_size,
                config.flush_staleness,
                config.flush_timeout,
            ),
            progress: ProgressTracker::new(config.progress_interval),
            shutter,
            health,
            chain,
            stop_block,
            genesis_written: false,
        }
    }

    /// Returns the commit target.
    pub fn target(&self) -> &C {
        &self.target
    }

    /// Returns true once the loader began shutting down.
    pub fn is_terminating(&self) -> bool {
        self.shutter.is_terminating()
    }

    /// Returns true if an irreversible delivery at `number`, `index` of `count`, closes the
    /// group reaching the stop block.
    pub const fn reaches_stop_block(&self, number: u64, index: usize, count: usize) -> bool {
        self.stop_block != 0 && number >= self.stop_block && index + 1 == count
    }

    /// Records a freshly seen head block: progress, health and head metrics.
    pub fn observe_head(&mut self, block: &Block) {
        self.progress.record(block.number, Instant::now());
        self.health.set_healthy();
        Metrics::record_head_block_time(block.timestamp, SystemTime::now());
        Metrics::record_head_block_number(block.number);
    }

    /// Writes and finalizes the genesis sentinel when `block` is the first streamable block.
    ///
    /// The sentinel is written at most once per state lifetime.
    pub async fn write_genesis_if_needed(&mut self, block: &Block) -> LoaderResult<()> {
        if self.genesis_written || block.number != self.chain.first_streamable_block {
            return Ok(());
        }

        let genesis = block.genesis_sentinel(self.chain.genesis_block_num);
        info!(
            target: "loader",
            block_number = genesis.number,
            block_hash = %genesis.hash,
            "Writing genesis block"
        );
        self.target.put_block(&genesis).await.map_err(LoaderError::StoreGenesis)?;
        self.target
            .update_now_irreversible_block(&genesis)
            .await
            .map_err(LoaderError::GenesisIrreversible)?;

        self.genesis_written = true;
        Ok(())
    }

    /// Writes `block` provisionally.
    pub async fn put_block(&self, block: &Block) -> LoaderResult<()> {
        self.target
            .put_block(block)
            .await
            .map_err(|source| LoaderError::StoreBlock { number: block.number, source })
    }

    /// Finalizes the blocks of an irreversible group, in order.
    pub async fn finalize_group(&self, blocks: &[Block]) -> LoaderResult<()> {
        for block in blocks {
            self.target
                .update_now_irreversible_block(block)
                .await
                .map_err(|source| LoaderError::Finalize { number: block.number, source })?;
        }
        Ok(())
    }

    /// Runs the flush policy for `block`.
    pub async fn flush_if_needed(&self, block: &Block) -> LoaderResult<()> {
        self.flush.flush_if_needed(&*self.target, block, SystemTime::now()).await.map(|_| ())
    }

    /// Forces a flush and shuts the loader down.
    ///
    /// A failed flush shuts the loader down with that error and returns it.
    pub async fn finish_at_stop_block(&self, number: u64) -> LoaderResult<()> {
        info!(
            target: "loader",
            block_number = number,
            stop_block = self.stop_block,
            "Stop block reached, flushing and shutting down"
        );

        if let Err(err) = self.flush.flush(&*self.target, number).await {
            error!(target: "loader", block_number = number, %err, "Final flush failed");
            self.shutter.shutdown(Some(err.clone()));
            return Err(err);
        }

        self.shutter.shutdown(None);
        Ok(())
    }
}
