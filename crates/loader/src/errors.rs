//! Error types for the loader pipeline.

use crate::{ConfigError, StepKind};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a [`CommitTarget`](crate::CommitTarget).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    /// The requested entry does not exist, e.g. no block was ever finalized.
    #[error("entry not found")]
    NotFound,
    /// The backing store failed.
    #[error("commit backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by a [`BlockStore`](crate::BlockStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The bundle starting at the given block number is not available yet.
    #[error("bundle {0} not found")]
    NotFound(u64),
    /// The store failed to read or decode a bundle.
    #[error("block store error: {0}")]
    Backend(String),
}

/// Errors surfaced by a [`BlockSource`](crate::BlockSource).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Reading from the block store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The live transport failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// A source task panicked or was aborted.
    #[error("source task failed: {0}")]
    Task(String),
}

/// Errors raised while resolving where a pipeline starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Looking up the last finalized block in the commit target failed.
    #[error("failed getting latest written irreversible block: {0}")]
    LastIrreversible(#[source] CommitError),
    /// The start-block resolver failed.
    #[error("unable to resolve start block {start}: {reason}")]
    StartBlock {
        /// The requested start block.
        start: u64,
        /// The resolver failure.
        reason: String,
    },
}

/// Errors raised by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoaderError {
    /// Resolving the starting position failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Writing the genesis sentinel failed.
    #[error("store genesis block: {0}")]
    StoreGenesis(#[source] CommitError),
    /// Finalizing the genesis sentinel failed.
    #[error("set genesis block irreversible: {0}")]
    GenesisIrreversible(#[source] CommitError),
    /// The provisional write of a block failed.
    #[error("store block {number}: {source}")]
    StoreBlock {
        /// The block number.
        number: u64,
        /// The commit failure.
        #[source]
        source: CommitError,
    },
    /// Finalizing a block of an irreversible group failed.
    #[error("update irreversible block {number}: {source}")]
    Finalize {
        /// The block number.
        number: u64,
        /// The commit failure.
        #[source]
        source: CommitError,
    },
    /// The commit target failed to flush.
    #[error("flush failed: {0}")]
    Flush(#[source] CommitError),
    /// The flush did not complete in time.
    #[error("flush failed: timed out after {0:?}")]
    FlushTimeout(Duration),
    /// The fork resolver emitted a step the loader does not handle.
    #[error("unsupported forkable step \"{0}\"")]
    UnsupportedStep(StepKind),
    /// The block source failed.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The loader was launched before a pipeline was built.
    #[error("no pipeline built")]
    PipelineNotBuilt,
    /// A required component was not provided to the builder.
    #[error("missing {0}")]
    MissingComponent(&'static str),
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A [`Result`] alias for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;
