//! Test utilities for the loader pipeline.

use crate::{
    Block, BlockHandler, BlockPosition, BlockRef, BlockSource, BlockStore, CommitError,
    CommitTarget, ForkResolverFactory, ForkableBlock, ForkableOptions, HistoricalSourceFactory,
    LiveSourceFactory, LoaderResult, ResolveError, SourceError, StartBlockResolver, StoreError,
};
use alloy_primitives::B256;
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Timestamp given to test blocks, far enough in the past not to trigger staleness flushes.
pub const TEST_BLOCK_TIMESTAMP: u64 = 1_500_000_000;

/// Returns a deterministic block at `number`, linked to the block at `number - 1`.
pub fn block_at(number: u64) -> Block {
    Block {
        hash: hash_of(number),
        number,
        parent_hash: hash_of(number.wrapping_sub(1)),
        timestamp: TEST_BLOCK_TIMESTAMP + number,
        payload: Bytes::copy_from_slice(&number.to_be_bytes()),
    }
}

/// Returns the hash [`block_at`] gives block `number`.
pub fn hash_of(number: u64) -> B256 {
    let mut hash = B256::repeat_byte(0xaa);
    hash[24..].copy_from_slice(&number.to_be_bytes());
    hash
}

/// Returns the consecutive blocks in `range`.
pub fn chain(range: core::ops::RangeInclusive<u64>) -> Vec<Block> {
    range.map(block_at).collect()
}

/// An operation recorded by [`RecordingCommitTarget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOp {
    /// A provisional write of the block number.
    Put(u64),
    /// A finalization of the block number.
    Finalize(u64),
    /// A flush.
    Flush,
}

/// An in-memory [`CommitTarget`] recording every successful operation.
#[derive(Debug, Default)]
pub struct RecordingCommitTarget {
    ops: Mutex<Vec<CommitOp>>,
    blocks: Mutex<BTreeMap<u64, Block>>,
    last_irreversible: Mutex<Option<BlockRef>>,
    lookup_error: Option<CommitError>,
    fail_put_at: Option<u64>,
    fail_finalize_at: Option<u64>,
    fail_flush: bool,
    flush_delay: Option<Duration>,
}

impl RecordingCommitTarget {
    /// Seeds the last irreversible block reference.
    pub fn with_last_irreversible(self, block_ref: BlockRef) -> Self {
        *self.last_irreversible.lock().unwrap() = Some(block_ref);
        self
    }

    /// Fails the last irreversible lookup with `err`.
    pub fn with_lookup_error(mut self, err: CommitError) -> Self {
        self.lookup_error = Some(err);
        self
    }

    /// Fails provisional writes of block `number`.
    pub const fn fail_put_at(mut self, number: u64) -> Self {
        self.fail_put_at = Some(number);
        self
    }

    /// Fails finalization of block `number`.
    pub const fn fail_finalize_at(mut self, number: u64) -> Self {
        self.fail_finalize_at = Some(number);
        self
    }

    /// Fails every flush.
    pub const fn fail_flush(mut self) -> Self {
        self.fail_flush = true;
        self
    }

    /// Delays every flush by `delay`.
    pub const fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = Some(delay);
        self
    }

    /// Returns the recorded operations.
    pub fn ops(&self) -> Vec<CommitOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Returns the numbers of provisionally written blocks, in write order.
    pub fn puts(&self) -> Vec<u64> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                CommitOp::Put(number) => Some(number),
                _ => None,
            })
            .collect()
    }

    /// Returns the numbers of finalized blocks, in finalization order.
    pub fn finalized(&self) -> Vec<u64> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                CommitOp::Finalize(number) => Some(number),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of flushes.
    pub fn flushes(&self) -> usize {
        self.ops().into_iter().filter(|op| *op == CommitOp::Flush).count()
    }

    /// Returns the last block written at `number`.
    pub fn block(&self, number: u64) -> Option<Block> {
        self.blocks.lock().unwrap().get(&number).cloned()
    }

    fn record(&self, op: CommitOp) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl CommitTarget for RecordingCommitTarget {
    async fn put_block(&self, block: &Block) -> Result<(), CommitError> {
        if self.fail_put_at == Some(block.number) {
            return Err(CommitError::Backend("put failed".to_string()));
        }
        self.blocks.lock().unwrap().insert(block.number, block.clone());
        self.record(CommitOp::Put(block.number));
        Ok(())
    }

    async fn update_now_irreversible_block(&self, block: &Block) -> Result<(), CommitError> {
        if self.fail_finalize_at == Some(block.number) {
            return Err(CommitError::Backend("finalize failed".to_string()));
        }
        *self.last_irreversible.lock().unwrap() = Some(block.block_ref());
        self.record(CommitOp::Finalize(block.number));
        Ok(())
    }

    async fn flush(&self) -> Result<(), CommitError> {
        if let Some(delay) = self.flush_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_flush {
            return Err(CommitError::Backend("flush failed".to_string()));
        }
        self.record(CommitOp::Flush);
        Ok(())
    }

    async fn last_written_irreversible_block_ref(&self) -> Result<BlockRef, CommitError> {
        if let Some(err) = &self.lookup_error {
            return Err(err.clone());
        }
        self.last_irreversible.lock().unwrap().ok_or(CommitError::NotFound)
    }
}

/// A [`BlockHandler`] collecting every item it receives.
#[derive(Debug)]
pub struct CollectingHandler<T> {
    items: Arc<Mutex<Vec<T>>>,
    fail_at: Option<u64>,
}

impl<T> Default for CollectingHandler<T> {
    fn default() -> Self {
        Self { items: Arc::default(), fail_at: None }
    }
}

impl<T> Clone for CollectingHandler<T> {
    fn clone(&self) -> Self {
        Self { items: Arc::clone(&self.items), fail_at: self.fail_at }
    }
}

impl<T: Clone> CollectingHandler<T> {
    /// Fails when receiving the item at block `number`.
    pub const fn fail_at(mut self, number: u64) -> Self {
        self.fail_at = Some(number);
        self
    }

    /// Returns the collected items.
    pub fn items(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }
}

impl<T: BlockPosition + Clone> CollectingHandler<T> {
    /// Returns the block numbers of the collected items.
    pub fn numbers(&self) -> Vec<u64> {
        self.items.lock().unwrap().iter().map(BlockPosition::number).collect()
    }
}

#[async_trait]
impl<T> BlockHandler<T> for CollectingHandler<T>
where
    T: BlockPosition + core::fmt::Debug + Send + 'static,
{
    async fn handle(&mut self, item: T) -> LoaderResult<()> {
        if self.fail_at == Some(item.number()) {
            return Err(crate::LoaderError::StoreBlock {
                number: item.number(),
                source: CommitError::Backend("handler failed".to_string()),
            });
        }
        self.items.lock().unwrap().push(item);
        Ok(())
    }
}

/// A [`BlockSource`] sending a fixed list of blocks, then an optional error.
#[derive(Debug, Clone, Default)]
pub struct VecBlockSource {
    blocks: Vec<Block>,
    error: Option<SourceError>,
    hold_open: bool,
}

impl VecBlockSource {
    /// Creates a source sending `blocks`.
    pub const fn new(blocks: Vec<Block>) -> Self {
        Self { blocks, error: None, hold_open: false }
    }

    /// Fails with `error` once every block was sent.
    pub fn with_error(mut self, error: SourceError) -> Self {
        self.error = Some(error);
        self
    }

    /// Waits for cancellation once every block was sent, instead of returning.
    pub const fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[async_trait]
impl BlockSource for VecBlockSource {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<Block>,
        cancellation: CancellationToken,
    ) -> Result<(), SourceError> {
        for block in self.blocks {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Ok(()),
                sent = tx.send(block) => if sent.is_err() { return Ok(()) },
            }
        }
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.hold_open {
            cancellation.cancelled().await;
        }
        Ok(())
    }
}

/// A [`HistoricalSourceFactory`] serving a fixed chain from the requested start block.
#[derive(Debug, Clone, Default)]
pub struct VecHistoricalFactory {
    blocks: Vec<Block>,
    hold_open: bool,
    starts: Arc<Mutex<Vec<u64>>>,
}

impl VecHistoricalFactory {
    /// Creates a factory serving `blocks`.
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks, ..Default::default() }
    }

    /// Keeps created sources open once every block was sent.
    pub const fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Returns the start blocks sources were created with.
    pub fn starts(&self) -> Vec<u64> {
        self.starts.lock().unwrap().clone()
    }
}

impl HistoricalSourceFactory for VecHistoricalFactory {
    fn new_source(&self, start_block: u64, _parallelism: usize) -> Box<dyn BlockSource> {
        self.starts.lock().unwrap().push(start_block);
        let blocks = self.blocks.iter().filter(|b| b.number >= start_block).cloned().collect();
        let source = VecBlockSource::new(blocks);
        Box::new(if self.hold_open { source.hold_open() } else { source })
    }
}

/// A [`LiveSourceFactory`] serving a fixed list of blocks.
#[derive(Debug, Clone, Default)]
pub struct VecLiveFactory {
    blocks: Vec<Block>,
    requesters: Arc<Mutex<Vec<String>>>,
}

impl VecLiveFactory {
    /// Creates a factory serving `blocks`.
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks, requesters: Arc::default() }
    }

    /// Returns the requesters sources were created for.
    pub fn requesters(&self) -> Vec<String> {
        self.requesters.lock().unwrap().clone()
    }
}

impl LiveSourceFactory for VecLiveFactory {
    fn new_source(&self, requester: &str, _burst: usize) -> Box<dyn BlockSource> {
        self.requesters.lock().unwrap().push(requester.to_string());
        Box::new(VecBlockSource::new(self.blocks.clone()).hold_open())
    }
}

/// An in-memory [`BlockStore`] holding bundles keyed by base number.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    bundles: HashMap<u64, Vec<Block>>,
    failing: Option<u64>,
    reads: Mutex<Vec<u64>>,
}

impl MemoryBlockStore {
    /// Splits `blocks` into bundles of `bundle_size`.
    pub fn new(blocks: Vec<Block>, bundle_size: u64) -> Self {
        let mut bundles: HashMap<u64, Vec<Block>> = HashMap::new();
        for block in blocks {
            bundles.entry(block.number - block.number % bundle_size).or_default().push(block);
        }
        Self { bundles, ..Default::default() }
    }

    /// Fails reading the bundle at `base`.
    pub const fn fail_at(mut self, base: u64) -> Self {
        self.failing = Some(base);
        self
    }

    /// Returns the bases read so far.
    pub fn reads(&self) -> Vec<u64> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn read_bundle(&self, base_number: u64) -> Result<Vec<Block>, StoreError> {
        self.reads.lock().unwrap().push(base_number);
        if self.failing == Some(base_number) {
            return Err(StoreError::Backend(format!("corrupt bundle {base_number}")));
        }
        self.bundles.get(&base_number).cloned().ok_or(StoreError::NotFound(base_number))
    }
}

/// A fork resolver for a linear chain.
///
/// Emits `New` for every block and finalizes blocks in groups of `finality_group`, once a block
/// is `confirmations` deep. Ignores forks.
#[derive(Debug, Clone, Copy)]
pub struct LinearForkResolverFactory {
    /// Number of blocks finalized together.
    pub finality_group: usize,
    /// Depth at which a block becomes final.
    pub confirmations: usize,
}

impl Default for LinearForkResolverFactory {
    fn default() -> Self {
        Self { finality_group: 1, confirmations: 0 }
    }
}

impl ForkResolverFactory for LinearForkResolverFactory {
    fn build(
        &self,
        options: ForkableOptions,
        downstream: Box<dyn BlockHandler<ForkableBlock>>,
    ) -> Box<dyn BlockHandler<Block>> {
        Box::new(LinearForkResolver {
            options,
            finality_group: self.finality_group.max(1),
            confirmations: self.confirmations,
            pending: Vec::new(),
            downstream,
        })
    }
}

#[derive(Debug)]
struct LinearForkResolver {
    options: ForkableOptions,
    finality_group: usize,
    confirmations: usize,
    pending: Vec<Block>,
    downstream: Box<dyn BlockHandler<ForkableBlock>>,
}

#[async_trait]
impl BlockHandler<Block> for LinearForkResolver {
    async fn handle(&mut self, block: Block) -> LoaderResult<()> {
        if self.options.filter.matches(crate::StepKind::New) {
            self.downstream.handle(ForkableBlock::new_step(block.clone())).await?;
        }

        self.pending.push(block);
        if self.pending.len() < self.finality_group + self.confirmations {
            return Ok(());
        }

        let group: Vec<Block> = self.pending.drain(..self.finality_group).collect();
        if self.options.filter.matches(crate::StepKind::Irreversible) {
            for delivery in ForkableBlock::irreversible_group(group) {
                self.downstream.handle(delivery).await?;
            }
        }
        Ok(())
    }
}

/// A [`StartBlockResolver`] returning a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct FixedStartBlockResolver {
    start: Option<u64>,
}

impl FixedStartBlockResolver {
    /// Resolves every target to `start`.
    pub const fn new(start: u64) -> Self {
        Self { start: Some(start) }
    }

    /// Fails every resolution.
    pub const fn failing() -> Self {
        Self { start: None }
    }
}

#[async_trait]
impl StartBlockResolver for FixedStartBlockResolver {
    async fn resolve(&self, target: u64) -> Result<(u64, Option<B256>), ResolveError> {
        self.start.map(|start| (start, None)).ok_or_else(|| ResolveError::StartBlock {
            start: target,
            reason: "no block index".to_string(),
        })
    }
}
