//! Traits at the seams between the loader and its collaborators.

use crate::{
    Block, BlockRef, CommitError, ForkableBlock, LoaderResult, ResolveError, SourceError,
    StepFilter, StoreError,
};
use alloy_primitives::B256;
use async_trait::async_trait;
use core::fmt::Debug;
use derive_more::Constructor;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The durable store blocks are committed to.
///
/// Writes may be buffered by the implementation until [`CommitTarget::flush`] is called.
#[async_trait]
pub trait CommitTarget: Debug + Send + Sync {
    /// Writes a block provisionally. The block may still be reorganized away.
    async fn put_block(&self, block: &Block) -> Result<(), CommitError>;

    /// Marks a previously written block as irreversible.
    async fn update_now_irreversible_block(&self, block: &Block) -> Result<(), CommitError>;

    /// Commits buffered writes.
    async fn flush(&self) -> Result<(), CommitError>;

    /// Returns the last block marked irreversible.
    ///
    /// Returns [`CommitError::NotFound`] when no block was ever finalized.
    async fn last_written_irreversible_block_ref(&self) -> Result<BlockRef, CommitError>;
}

/// A sequential consumer of pipeline items.
///
/// Handlers are chained: gates and fork resolvers wrap a downstream handler and forward to it.
#[async_trait]
pub trait BlockHandler<T>: Debug + Send {
    /// Processes one item. An error terminates the pipeline.
    async fn handle(&mut self, item: T) -> LoaderResult<()>;
}

#[async_trait]
impl<T: Send + 'static> BlockHandler<T> for Box<dyn BlockHandler<T>> {
    async fn handle(&mut self, item: T) -> LoaderResult<()> {
        (**self).handle(item).await
    }
}

/// A producer of ordered blocks.
#[async_trait]
pub trait BlockSource: Debug + Send {
    /// Streams blocks into `tx` until the source is exhausted, `cancellation` fires or the
    /// receiving end is dropped.
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<Block>,
        cancellation: CancellationToken,
    ) -> Result<(), SourceError>;
}

/// Read access to archived block bundles.
///
/// A bundle holds the blocks of a fixed-size range of consecutive numbers starting at
/// `base_number`.
#[async_trait]
pub trait BlockStore: Debug + Send + Sync {
    /// Reads the bundle starting at `base_number`, in chain order.
    ///
    /// Returns [`StoreError::NotFound`] when the bundle is not available yet.
    async fn read_bundle(&self, base_number: u64) -> Result<Vec<Block>, StoreError>;
}

/// Builds historical sources reading from archived block files.
pub trait HistoricalSourceFactory: Debug + Send + Sync {
    /// Creates a source starting at `start_block`, fetching up to `parallelism` bundles at once.
    fn new_source(&self, start_block: u64, parallelism: usize) -> Box<dyn BlockSource>;
}

/// Builds sources following the live block feed.
pub trait LiveSourceFactory: Debug + Send + Sync {
    /// Creates a live source identifying itself as `requester`, asking the feed for a burst of
    /// `burst` recent blocks on connect.
    fn new_source(&self, requester: &str, burst: usize) -> Box<dyn BlockSource>;
}

/// Options handed to the fork resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Constructor)]
pub struct ForkableOptions {
    /// The steps the resolver should emit.
    pub filter: StepFilter,
    /// Whether every buffered segment eventually triggers a longest-chain evaluation.
    pub ensure_all_blocks_trigger_longest_chain: bool,
}

/// Builds fork resolvers.
///
/// A fork resolver consumes raw blocks and re-emits them, classified by step, to `downstream`.
pub trait ForkResolverFactory: Debug + Send + Sync {
    /// Wraps `downstream` in a fork resolver configured with `options`.
    fn build(
        &self,
        options: ForkableOptions,
        downstream: Box<dyn BlockHandler<ForkableBlock>>,
    ) -> Box<dyn BlockHandler<Block>>;
}

/// Maps a requested start block to the block a historical source should begin reading at.
#[async_trait]
pub trait StartBlockResolver: Debug + Send + Sync {
    /// Resolves `target` to the block to start reading from, and the hash of the last
    /// irreversible block before it when known.
    async fn resolve(&self, target: u64) -> Result<(u64, Option<B256>), ResolveError>;
}
