use crate::{
    BlockHandler, CommitTarget, ForkableBlock, IngestJob, IngestState, LoaderResult, Metrics, Step,
};
use async_trait::async_trait;
use derive_more::Constructor;

/// The per-delivery ingestion callback.
///
/// Receives classified blocks from the fork resolver, strictly sequentially, and hands them to
/// the configured [`IngestJob`].
#[derive(Debug, Constructor)]
pub struct Ingestor<C, J> {
    state: IngestState<C>,
    job: J,
}

impl<C, J> Ingestor<C, J> {
    /// Returns the ingestion state.
    pub const fn state(&self) -> &IngestState<C> {
        &self.state
    }
}

#[async_trait]
impl<C, J> BlockHandler<ForkableBlock> for Ingestor<C, J>
where
    C: CommitTarget + 'static,
    J: IngestJob<C> + 'static,
{
    async fn handle(&mut self, item: ForkableBlock) -> LoaderResult<()> {
        if self.state.is_terminating() {
            return Ok(());
        }

        debug!(
            target: "loader",
            job = self.job.name(),
            block_number = item.block.number,
            block_hash = %item.block.hash,
            step = %item.step,
            "Processing block"
        );

        let step = Step::try_from(item)?;
        Metrics::record_step(step.kind());
        self.job.process(&mut self.state, step).await
    }
}
