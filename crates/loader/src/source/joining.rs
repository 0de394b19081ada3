//! Handoff from a historical source to a live source.

use super::join_source;
use crate::{Block, BlockRef, BlockSource, SourceError};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// A [`BlockSource`] reading a historical source until a live source catches up with it.
///
/// Both sources run concurrently. Live blocks are buffered, keeping only the most recent
/// `buffer_size`, until the buffer links to the last block delivered from the historical
/// source. The buffered blocks following that link are then delivered, the historical source
/// is stopped, and live blocks are forwarded as they arrive.
///
/// When nothing was delivered yet, the join happens as soon as the buffer holds the target
/// block, delivering from that block on, or when the oldest buffered live block is at or below
/// the target block number.
#[derive(Debug)]
pub struct JoiningSource {
    historical: Box<dyn BlockSource>,
    live: Box<dyn BlockSource>,
    target_block_num: u64,
    target_block: Option<BlockRef>,
    buffer_size: usize,
}

impl JoiningSource {
    /// Creates a new [`JoiningSource`].
    pub fn new(
        historical: Box<dyn BlockSource>,
        live: Box<dyn BlockSource>,
        target_block_num: u64,
        buffer_size: usize,
    ) -> Self {
        Self {
            historical,
            live,
            target_block_num,
            target_block: None,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Joins as soon as the live buffer holds `block`, even if the historical source never
    /// delivered anything.
    pub const fn with_target_block(mut self, block: BlockRef) -> Self {
        self.target_block = Some(block);
        self
    }
}

/// Bookkeeping of the join, independent of the tasks feeding it.
#[derive(Debug)]
struct JoinState {
    target_block_num: u64,
    target_block: Option<BlockRef>,
    buffer_size: usize,
    buffer: VecDeque<Block>,
    last_delivered: Option<BlockRef>,
}

impl JoinState {
    const fn new(
        target_block_num: u64,
        target_block: Option<BlockRef>,
        buffer_size: usize,
    ) -> Self {
        Self {
            target_block_num,
            target_block,
            buffer_size,
            buffer: VecDeque::new(),
            last_delivered: None,
        }
    }

    fn buffer_live(&mut self, block: Block) {
        if self.buffer.len() == self.buffer_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(block);
    }

    /// Returns the buffered blocks to deliver if the live buffer joins the delivered stream.
    fn try_join(&mut self) -> Option<Vec<Block>> {
        let start = match self.last_delivered {
            None => {
                let target = self.target_block.and_then(|target| {
                    self.buffer.iter().position(|b| b.hash == target.hash)
                });
                match target {
                    Some(index) => index,
                    None => {
                        let oldest = self.buffer.front()?;
                        (oldest.number <= self.target_block_num).then_some(0)?
                    }
                }
            }
            Some(last) => {
                if let Some(index) = self.buffer.iter().position(|b| b.hash == last.hash) {
                    index + 1
                } else {
                    self.buffer.iter().position(|b| b.parent_hash == last.hash)?
                }
            }
        };
        let joined: Vec<Block> = self.buffer.drain(..).skip(start).collect();
        if let Some(last) = joined.last() {
            self.last_delivered = Some(last.block_ref());
        }
        Some(joined)
    }
}

#[async_trait]
impl BlockSource for JoiningSource {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<Block>,
        cancellation: CancellationToken,
    ) -> Result<(), SourceError> {
        let Self { historical, live, target_block_num, target_block, buffer_size } = *self;

        let children = cancellation.child_token();
        let _guard = children.clone().drop_guard();
        let historical_cancellation = children.child_token();

        let (historical_tx, mut historical_rx) = mpsc::channel(buffer_size);
        let (live_tx, mut live_rx) = mpsc::channel(buffer_size);
        let mut historical_task: Option<JoinHandle<Result<(), SourceError>>> =
            Some(tokio::spawn(historical.run(historical_tx, historical_cancellation.clone())));
        let live_task = tokio::spawn(live.run(live_tx, children.clone()));

        let mut state = JoinState::new(target_block_num, target_block, buffer_size);
        let mut joined = false;

        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Ok(()),
                maybe_block = historical_rx.recv(), if !joined && historical_task.is_some() => {
                    match maybe_block {
                        Some(block) => {
                            state.last_delivered = Some(block.block_ref());
                            if tx.send(block).await.is_err() {
                                return Ok(());
                            }
                        }
                        None => {
                            if let Some(task) = historical_task.take() {
                                join_source(task).await?;
                            }
                            debug!(
                                target: "joining_source",
                                "Historical source exhausted, waiting for live blocks to link"
                            );
                        }
                    }
                }
                maybe_block = live_rx.recv() => {
                    let Some(block) = maybe_block else {
                        info!(target: "joining_source", "Live source ended");
                        return join_source(live_task).await;
                    };
                    if joined {
                        if tx.send(block).await.is_err() {
                            return Ok(());
                        }
                        continue;
                    }
                    state.buffer_live(block);
                }
            }

            if joined {
                continue;
            }
            if let Some(blocks) = state.try_join() {
                info!(
                    target: "joining_source",
                    last_delivered = ?state.last_delivered,
                    buffered = blocks.len(),
                    "Joined live source"
                );
                historical_cancellation.cancel();
                historical_task = None;
                joined = true;
                for block in blocks {
                    if tx.send(block).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
