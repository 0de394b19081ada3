//! Historical source reading archived block bundles.

use crate::{Block, BlockSource, BlockStore, HistoricalSourceFactory, SourceError, StoreError};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default number of blocks per bundle.
pub const DEFAULT_BUNDLE_SIZE: u64 = 100;

/// Default delay before polling again for a bundle that is not available yet.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// A [`BlockSource`] replaying bundles from a [`BlockStore`].
///
/// Up to `parallelism` bundles are fetched concurrently, blocks are delivered in chain order.
/// Blocks below the start block are skipped. When the next bundle is not available yet, the
/// source waits and polls the store again, so it never ends on its own.
#[derive(Debug)]
pub struct FileSource<S> {
    store: Arc<S>,
    start_block: u64,
    parallelism: usize,
    bundle_size: u64,
    retry_interval: Duration,
}

impl<S> FileSource<S> {
    /// Creates a new [`FileSource`] starting at `start_block`.
    pub fn new(store: Arc<S>, start_block: u64, parallelism: usize) -> Self {
        Self {
            store,
            start_block,
            parallelism: parallelism.max(1),
            bundle_size: DEFAULT_BUNDLE_SIZE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Sets the number of blocks per bundle.
    pub fn with_bundle_size(mut self, bundle_size: u64) -> Self {
        self.bundle_size = bundle_size.max(1);
        self
    }

    /// Sets the delay before polling again for a missing bundle.
    pub const fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    const fn bundle_base(&self, number: u64) -> u64 {
        number - number % self.bundle_size
    }
}

#[async_trait]
impl<S: BlockStore + 'static> BlockSource for FileSource<S> {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<Block>,
        cancellation: CancellationToken,
    ) -> Result<(), SourceError> {
        let mut next_base = self.bundle_base(self.start_block);
        info!(
            target: "file_source",
            start_block = self.start_block,
            bundle = next_base,
            parallelism = self.parallelism,
            "Starting file source"
        );

        loop {
            let bases = (next_base..).step_by(self.bundle_size as usize);
            let mut bundles = stream::iter(bases)
                .map(|base| {
                    let store = Arc::clone(&self.store);
                    async move { (base, store.read_bundle(base).await) }
                })
                .buffered(self.parallelism);

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => return Ok(()),
                    next = bundles.next() => next,
                };
                let Some((base, result)) = next else {
                    return Ok(());
                };

                let blocks = match result {
                    Ok(blocks) => blocks,
                    Err(StoreError::NotFound(_)) => break,
                    Err(err) => {
                        error!(target: "file_source", bundle = base, %err, "Failed to read bundle");
                        return Err(err.into());
                    }
                };

                trace!(target: "file_source", bundle = base, blocks = blocks.len(), "Read bundle");
                for block in blocks.into_iter().filter(|b| b.number >= self.start_block) {
                    tokio::select! {
                        biased;
                        _ = cancellation.cancelled() => return Ok(()),
                        sent = tx.send(block) => if sent.is_err() {
                            return Ok(());
                        },
                    }
                }
                next_base = base + self.bundle_size;
            }

            drop(bundles);
            debug!(target: "file_source", bundle = next_base, "Bundle not available yet, waiting");
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }
}

/// Builds [`FileSource`]s over a shared [`BlockStore`].
#[derive(Debug)]
pub struct FileSourceFactory<S> {
    store: Arc<S>,
    bundle_size: u64,
    retry_interval: Duration,
}

impl<S> FileSourceFactory<S> {
    /// Creates a new [`FileSourceFactory`].
    pub const fn new(store: Arc<S>) -> Self {
        Self { store, bundle_size: DEFAULT_BUNDLE_SIZE, retry_interval: DEFAULT_RETRY_INTERVAL }
    }

    /// Sets the number of blocks per bundle.
    pub const fn with_bundle_size(mut self, bundle_size: u64) -> Self {
        self.bundle_size = bundle_size;
        self
    }

    /// Sets the delay before polling again for a missing bundle.
    pub const fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

impl<S: BlockStore + 'static> HistoricalSourceFactory for FileSourceFactory<S> {
    fn new_source(&self, start_block: u64, parallelism: usize) -> Box<dyn BlockSource> {
        Box::new(
            FileSource::new(Arc::clone(&self.store), start_block, parallelism)
                .with_bundle_size(self.bundle_size)
                .with_retry_interval(self.retry_interval),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryBlockStore, chain};

    async fn collect(rx: &mut mpsc::Receiver<Block>, count: usize) -> Vec<u64> {
        let mut numbers = Vec::with_capacity(count);
        while numbers.len() < count {
            numbers.push(rx.recv().await.unwrap().number);
        }
        numbers
    }

    #[tokio::test]
    async fn test_delivers_in_order_from_start_block() {
        let store = Arc::new(MemoryBlockStore::new(chain(0..=349), 100));
        let source = FileSource::new(store, 150, 3);
        let (tx, mut rx) = mpsc::channel(16);
        let cancellation = CancellationToken::new();

        let handle = tokio::spawn(Box::new(source).run(tx, cancellation.clone()));

        let numbers = collect(&mut rx, 200).await;
        assert_eq!(numbers, (150..350).collect::<Vec<_>>());

        cancellation.cancel();
        assert_eq!(handle.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_missing_bundle() {
        let store = Arc::new(MemoryBlockStore::new(chain(0..=99), 100));
        let source = FileSource::new(Arc::clone(&store), 90, 2)
            .with_retry_interval(Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(16);
        let cancellation = CancellationToken::new();

        let handle = tokio::spawn(Box::new(source).run(tx, cancellation.clone()));

        assert_eq!(collect(&mut rx, 10).await, (90..100).collect::<Vec<_>>());
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        // The missing bundle is polled again after each retry interval.
        let retries = store.reads().iter().filter(|base| **base == 100).count();
        assert!(retries >= 2, "bundle 100 read {retries} times");

        cancellation.cancel();
        assert_eq!(handle.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_store_error_fails_source() {
        let store = Arc::new(MemoryBlockStore::new(chain(0..=299), 100).fail_at(100));
        let source = FileSource::new(store, 0, 1);
        let (tx, mut rx) = mpsc::channel(256);

        let result = Box::new(source).run(tx, CancellationToken::new()).await;

        assert_eq!(
            result,
            Err(SourceError::Store(StoreError::Backend("corrupt bundle 100".into())))
        );
        assert_eq!(collect(&mut rx, 100).await, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_stops_when_receiver_dropped() {
        let store = Arc::new(MemoryBlockStore::new(chain(0..=999), 100));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let source = Box::new(FileSource::new(store, 0, 4));
        let result = source.run(tx, CancellationToken::new()).await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_factory_applies_bundle_size() {
        let store = Arc::new(MemoryBlockStore::new(chain(0..=19), 10));
        let factory = FileSourceFactory::new(Arc::clone(&store)).with_bundle_size(10);
        let (tx, mut rx) = mpsc::channel(32);
        let cancellation = CancellationToken::new();

        let handle = tokio::spawn(factory.new_source(5, 2).run(tx, cancellation.clone()));

        assert_eq!(collect(&mut rx, 15).await, (5..20).collect::<Vec<_>>());
        cancellation.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(store.reads()[..2], [0, 10]);
    }
}
