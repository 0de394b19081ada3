#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod block;
pub use block::{Block, BlockPosition, BlockRef};

mod step;
pub use step::{ForkableBlock, Step, StepFilter, StepKind};

mod errors;
pub use errors::{CommitError, LoaderError, LoaderResult, ResolveError, SourceError, StoreError};

mod traits;
pub use traits::{
    BlockHandler, BlockSource, BlockStore, CommitTarget, ForkResolverFactory, ForkableOptions,
    HistoricalSourceFactory, LiveSourceFactory, StartBlockResolver,
};

mod gate;
pub use gate::{BlockIdGate, BlockNumGate, GateKind};

mod source;
pub use source::{
    DEFAULT_BUNDLE_SIZE, DEFAULT_RETRY_INTERVAL, FileSource, FileSourceFactory,
    IdentityStartBlockResolver, JoiningSource, Pipeline,
};

mod ingest;
pub use ingest::{
    FlushController, FullJob, IngestJob, IngestState, Ingestor, PatchJob, ProgressTracker,
};

mod lifecycle;
pub use lifecycle::{HealthFlag, Shutter};

mod loader;
pub use loader::{BlockLoader, LoaderBuilder, PipelineMode};

mod config;
pub use config::{ChainConfig, ConfigError, LoaderConfig};

mod metrics;
pub use metrics::Metrics;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
