//! Drives a composed block source into its handler chain.

use super::join_source;
use crate::{Block, BlockHandler, BlockSource, LoaderError, LoaderResult, Shutter};
use tokio::sync::mpsc;

/// An assembled pipeline: a block source and the handler chain consuming it.
///
/// The pipeline has its own [`Shutter`]. It terminates when the source ends or fails, when a
/// handler fails, or when the shutter is shut down from outside. In every case the shutter
/// records the cause, so hooks linked to it observe the termination.
#[derive(Debug)]
pub struct Pipeline {
    source: Box<dyn BlockSource>,
    handler: Box<dyn BlockHandler<Block>>,
    shutter: Shutter,
    channel_size: usize,
}

#[derive(Debug)]
enum Exit {
    Cancelled,
    Exhausted,
    Failed(LoaderError),
}

impl Pipeline {
    /// Creates a new [`Pipeline`].
    pub fn new(
        source: Box<dyn BlockSource>,
        handler: Box<dyn BlockHandler<Block>>,
        channel_size: usize,
    ) -> Self {
        let channel_size = channel_size.max(1);
        Self { source, handler, shutter: Shutter::new("pipeline"), channel_size }
    }

    /// Returns the shutter of this pipeline.
    pub const fn shutter(&self) -> &Shutter {
        &self.shutter
    }

    /// Runs the pipeline until it terminates, returning the termination cause.
    ///
    /// Blocks are handed to the handler chain one at a time. An in-flight delivery is never
    /// interrupted; shutdown is observed between deliveries.
    pub async fn run(self) -> LoaderResult<()> {
        let Self { source, mut handler, shutter, channel_size } = self;
        let token = shutter.token();

        let (tx, mut rx) = mpsc::channel(channel_size);
        let source_task = tokio::spawn(source.run(tx, token.clone()));

        let exit = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break Exit::Cancelled,
                maybe_block = rx.recv() => {
                    let Some(block) = maybe_block else {
                        break Exit::Exhausted;
                    };
                    if let Err(err) = handler.handle(block).await {
                        error!(target: "pipeline", %err, "Failed to process block");
                        break Exit::Failed(err);
                    }
                }
            }
        };
        drop(rx);

        match exit {
            Exit::Cancelled => {
                if let Err(err) = join_source(source_task).await {
                    warn!(target: "pipeline", %err, "Source failed while shutting down");
                }
            }
            Exit::Exhausted => {
                let cause = join_source(source_task).await.err().map(LoaderError::from);
                match &cause {
                    Some(err) => error!(target: "pipeline", %err, "Block source failed"),
                    None => info!(target: "pipeline", "Block source ended"),
                }
                shutter.shutdown(cause);
            }
            Exit::Failed(err) => {
                shutter.shutdown(Some(err));
                let _ = join_source(source_task).await;
            }
        }

        shutter.cause().map_or(Ok(()), Err)
    }
}
