//! Ingestion policies.

use crate::{CommitTarget, IngestState, LoaderResult, Step};
use async_trait::async_trait;
use core::fmt::Debug;

/// A policy interpreting classified steps against the commit target.
#[async_trait]
pub trait IngestJob<C: CommitTarget>: Debug + Send + Sync {
    /// Name of the job, for logs.
    fn name(&self) -> &'static str;

    /// Processes one step.
    async fn process(&self, state: &mut IngestState<C>, step: Step) -> LoaderResult<()>;
}

/// Loads the chain: provisional writes on `New`, finalization on `Irreversible`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullJob;

#[async_trait]
impl<C: CommitTarget + 'static> IngestJob<C> for FullJob {
    fn name(&self) -> &'static str {
        "full"
    }

    async fn process(&self, state: &mut IngestState<C>, step: Step) -> LoaderResult<()> {
        match step {
            Step::New(block) => {
                state.observe_head(&block);
                state.write_genesis_if_needed(&block).await?;
                state.put_block(&block).await?;
                state.flush_if_needed(&block).await
            }
            Step::Irreversible { block, index, count, blocks } => {
                if state.reaches_stop_block(block.number, index, count) {
                    return state.finish_at_stop_block(block.number).await;
                }

                // Only the first delivery of a group carries the finalization.
                if index != 0 {
                    return Ok(());
                }

                state.finalize_group(&blocks).await?;
                state.flush_if_needed(&block).await.inspect_err(|err| {
                    error!(target: "loader", block_number = block.number, %err, "Flush failed");
                })
            }
        }
    }
}

/// Replays the chain without mutating the database.
///
/// Used to run ad-hoc patches against already loaded data: it keeps the progress, flush and
/// stop block behavior of [`FullJob`] and never writes the genesis sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchJob;

#[async_trait]
impl<C: CommitTarget + 'static> IngestJob<C> for PatchJob {
    fn name(&self) -> &'static str {
        "patch"
    }

    async fn process(&self, state: &mut IngestState<C>, step: Step) -> LoaderResult<()> {
        match step {
            Step::New(block) => {
                state.observe_head(&block);
                state.flush_if_needed(&block).await
            }
            Step::Irreversible { block, index, count, .. } => {
                if state.reaches_stop_block(block.number, index, count) {
                    return state.finish_at_stop_block(block.number).await;
                }
                Ok(())
            }
        }
    }
}
