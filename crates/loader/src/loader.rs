//! Pipeline assembly and launch.

use crate::{
    Block, BlockHandler, BlockIdGate, BlockNumGate, BlockRef, ChainConfig, CommitError,
    CommitTarget, ForkResolverFactory, ForkableOptions, FullJob, GateKind, HealthFlag,
    HistoricalSourceFactory, IngestJob, IngestState, Ingestor, JoiningSource, LiveSourceFactory,
    LoaderConfig, LoaderError, LoaderResult, PatchJob, Pipeline, ResolveError, Shutter,
    StartBlockResolver, StepFilter,
};
use derive_more::Display;
use std::sync::Arc;

/// The topology a [`BlockLoader`] pipeline is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PipelineMode {
    /// Resume from the last finalized block, then follow the live feed.
    #[display("live")]
    Live,
    /// Replay a bounded range of history into the commit target.
    #[display("batch")]
    Batch,
    /// Replay a bounded range of history without writing blocks.
    #[display("patch")]
    Patch,
}

/// Builder for a [`BlockLoader`].
#[derive(Debug)]
pub struct LoaderBuilder<C> {
    target: Option<Arc<C>>,
    historical: Option<Arc<dyn HistoricalSourceFactory>>,
    fork_resolver: Option<Arc<dyn ForkResolverFactory>>,
    config: LoaderConfig,
    chain: ChainConfig,
}

impl<C> Default for LoaderBuilder<C> {
    fn default() -> Self {
        Self {
            target: None,
            historical: None,
            fork_resolver: None,
            config: LoaderConfig::default(),
            chain: ChainConfig::default(),
        }
    }
}

impl<C: CommitTarget + 'static> LoaderBuilder<C> {
    /// Sets the commit target blocks are written to.
    pub fn with_commit_target(mut self, target: C) -> Self {
        self.target = Some(Arc::new(target));
        self
    }

    /// Sets the factory of historical sources.
    pub fn with_historical_source<F>(mut self, factory: F) -> Self
    where
        F: HistoricalSourceFactory + 'static,
    {
        self.historical = Some(Arc::new(factory));
        self
    }

    /// Sets the factory of fork resolvers.
    pub fn with_fork_resolver<F>(mut self, factory: F) -> Self
    where
        F: ForkResolverFactory + 'static,
    {
        self.fork_resolver = Some(Arc::new(factory));
        self
    }

    /// Sets the loader configuration.
    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the chain configuration.
    pub const fn with_chain(mut self, chain: ChainConfig) -> Self {
        self.chain = chain;
        self
    }

    /// Builds the [`BlockLoader`].
    pub fn build(self) -> LoaderResult<BlockLoader<C>> {
        self.config.validate()?;
        Ok(BlockLoader {
            target: self.target.ok_or(LoaderError::MissingComponent("commit target"))?,
            historical: self
                .historical
                .ok_or(LoaderError::MissingComponent("historical source factory"))?,
            fork_resolver: self
                .fork_resolver
                .ok_or(LoaderError::MissingComponent("fork resolver factory"))?,
            config: self.config,
            chain: self.chain,
            shutter: Shutter::new("loader"),
            health: HealthFlag::default(),
            stop_block: 0,
            mode: None,
            pipeline: None,
        })
    }
}

/// Loads blocks from a source pipeline into a [`CommitTarget`].
///
/// A loader is built once, then one of the `build_pipeline_*` methods assembles the source,
/// fork resolver and ingestion topology, and [`BlockLoader::launch`] runs it to termination.
/// The loader and its pipeline shut each other down: whichever side terminates first brings the
/// other one down with the same cause.
#[derive(Debug)]
pub struct BlockLoader<C> {
    target: Arc<C>,
    historical: Arc<dyn HistoricalSourceFactory>,
    fork_resolver: Arc<dyn ForkResolverFactory>,
    config: LoaderConfig,
    chain: ChainConfig,
    shutter: Shutter,
    health: HealthFlag,
    stop_block: u64,
    mode: Option<PipelineMode>,
    pipeline: Option<Pipeline>,
}

impl<C: CommitTarget + 'static> BlockLoader<C> {
    /// Stops loading right before block `number`. `0` means unbounded.
    ///
    /// Applies to pipelines built after the call.
    pub const fn stop_before_block(&mut self, number: u64) {
        self.stop_block = number;
    }

    /// Returns the health of the loader, as reported to liveness probes.
    pub fn healthy(&self) -> bool {
        self.health.is_healthy()
    }

    /// Returns the shutter of the loader.
    pub const fn shutter(&self) -> &Shutter {
        &self.shutter
    }

    /// Returns the mode of the last built pipeline.
    pub const fn mode(&self) -> Option<PipelineMode> {
        self.mode
    }

    /// Returns the commit target.
    pub fn target(&self) -> &C {
        &self.target
    }

    /// Shuts the loader down, propagating to a launched pipeline.
    pub fn shutdown(&self, cause: Option<LoaderError>) {
        self.shutter.shutdown(cause);
    }

    /// Assembles the live pipeline.
    ///
    /// Resumes right after the last finalized block of the commit target. When the commit target
    /// holds no finalized block and `allow_live_on_empty_table` is set, the pipeline starts at
    /// the first streamable block instead.
    pub async fn build_pipeline_live(
        &mut self,
        live: &dyn LiveSourceFactory,
        allow_live_on_empty_table: bool,
    ) -> LoaderResult<()> {
        let resume = match self.target.last_written_irreversible_block_ref().await {
            Ok(lib) => Some(lib),
            Err(CommitError::NotFound) if allow_live_on_empty_table => None,
            Err(err) => return Err(self.fail(ResolveError::LastIrreversible(err).into())),
        };
        let start_block = resume.map_or(self.chain.first_streamable_block, |lib| lib.number);
        info!(
            target: "loader",
            start_block,
            last_irreversible = ?resume.map(|lib: BlockRef| lib.hash),
            "Building live pipeline"
        );

        let historical =
            self.historical.new_source(start_block, self.config.parallel_file_download_count);
        let live = live.new_source(&self.config.live_requester, self.config.live_buffer_size);
        let source = JoiningSource::new(
            historical,
            live,
            self.chain.first_streamable_block,
            self.config.live_buffer_size,
        );
        let source = match resume {
            Some(lib) => source.with_target_block(lib),
            None => source,
        };

        let ingestor = self.ingestor(FullJob);
        let options = ForkableOptions::new(StepFilter::NEW | StepFilter::IRREVERSIBLE, true);
        let forkable = self.fork_resolver.build(options, Box::new(ingestor));
        let handler: Box<dyn BlockHandler<Block>> = match resume {
            Some(lib) => Box::new(BlockIdGate::new(lib.hash, GateKind::Exclusive, forkable)),
            None => forkable,
        };

        self.install(PipelineMode::Live, Pipeline::new(Box::new(source), handler, self.channel()));
        Ok(())
    }

    /// Assembles a bounded replay pipeline writing blocks from `start_block` on.
    pub async fn build_pipeline_batch(
        &mut self,
        start_block: u64,
        resolver: &dyn StartBlockResolver,
    ) -> LoaderResult<()> {
        self.build_pipeline_historical(PipelineMode::Batch, FullJob, start_block, resolver).await
    }

    /// Assembles a bounded replay pipeline from `start_block` on that never writes blocks.
    pub async fn build_pipeline_patch(
        &mut self,
        start_block: u64,
        resolver: &dyn StartBlockResolver,
    ) -> LoaderResult<()> {
        self.build_pipeline_historical(PipelineMode::Patch, PatchJob, start_block, resolver).await
    }

    async fn build_pipeline_historical<J>(
        &mut self,
        mode: PipelineMode,
        job: J,
        start_block: u64,
        resolver: &dyn StartBlockResolver,
    ) -> LoaderResult<()>
    where
        J: IngestJob<C> + 'static,
    {
        let (resolved_start, _) = match resolver.resolve(start_block).await {
            Ok(resolved) => resolved,
            Err(err) => return Err(self.fail(err.into())),
        };
        info!(
            target: "loader",
            %mode,
            start_block,
            resolved_start,
            stop_block = self.stop_block,
            "Building historical pipeline"
        );

        let gate = BlockNumGate::new(start_block, GateKind::Inclusive, self.ingestor(job))
            .with_max_hold_off(self.config.gate_max_hold_off);
        let options = ForkableOptions::new(StepFilter::NEW | StepFilter::IRREVERSIBLE, false);
        let forkable = self.fork_resolver.build(options, Box::new(gate));
        let source =
            self.historical.new_source(resolved_start, self.config.parallel_file_download_count);

        self.install(mode, Pipeline::new(source, forkable, self.channel()));
        Ok(())
    }

    /// Runs the built pipeline until it terminates.
    ///
    /// Returns the error the loader was shut down with, if any. Reaching the stop block is a
    /// clean termination.
    pub async fn launch(&mut self) -> LoaderResult<()> {
        let pipeline = self.pipeline.take().ok_or(LoaderError::PipelineNotBuilt)?;
        let pipeline_shutter = pipeline.shutter().clone();

        let loader_shutter = self.shutter.clone();
        let health = self.health.clone();
        pipeline_shutter.on_terminating(move |cause| {
            if !loader_shutter.is_terminating() {
                warn!(target: "loader", "Pipeline terminated unexpectedly, marking unhealthy");
                health.set_unhealthy();
            }
            loader_shutter.shutdown(cause);
        });
        self.shutter.on_terminating(move |cause| pipeline_shutter.shutdown(cause));

        info!(
            target: "loader",
            mode = ?self.mode,
            stop_block = self.stop_block,
            batch_size = self.config.batch_size,
            "Launching loader"
        );
        if let Err(err) = pipeline.run().await {
            debug!(target: "loader", %err, "Pipeline returned an error");
        }

        match self.shutter.cause() {
            Some(err) => {
                error!(target: "loader", %err, "Loader terminated with error");
                Err(err)
            }
            None => {
                info!(target: "loader", "Loader terminated");
                Ok(())
            }
        }
    }

    fn ingestor<J: IngestJob<C>>(&self, job: J) -> Ingestor<C, J> {
        let state = IngestState::new(
            Arc::clone(&self.target),
            &self.config,
            self.chain,
            self.shutter.clone(),
            self.health.clone(),
            self.stop_block,
        );
        Ingestor::new(state, job)
    }

    const fn channel(&self) -> usize {
        self.config.channel_size
    }

    fn install(&mut self, mode: PipelineMode, pipeline: Pipeline) {
        if self.pipeline.replace(pipeline).is_some() {
            warn!(target: "loader", %mode, "Replacing a pipeline that was never launched");
        }
        self.mode = Some(mode);
    }

    fn fail(&self, err: LoaderError) -> LoaderError {
        error!(target: "loader", %err, "Failed to build pipeline");
        self.shutter.shutdown(Some(err.clone()));
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ConfigError,
        test_utils::{
            CommitOp, FixedStartBlockResolver, LinearForkResolverFactory, RecordingCommitTarget,
            VecHistoricalFactory, VecLiveFactory, block_at, chain,
        },
    };
    use std::time::Duration;

    fn loader(
        target: RecordingCommitTarget,
        historical: VecHistoricalFactory,
        fork_resolver: LinearForkResolverFactory,
    ) -> BlockLoader<RecordingCommitTarget> {
        LoaderBuilder::default()
            .with_commit_target(target)
            .with_historical_source(historical)
            .with_fork_resolver(fork_resolver)
            .build()
            .unwrap()
    }

    fn default_loader(historical: VecHistoricalFactory) -> BlockLoader<RecordingCommitTarget> {
        loader(RecordingCommitTarget::default(), historical, LinearForkResolverFactory::default())
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_build_requires_components() {
        let err = LoaderBuilder::<RecordingCommitTarget>::default().build().unwrap_err();
        assert_eq!(err, LoaderError::MissingComponent("commit target"));

        let err = LoaderBuilder::default()
            .with_commit_target(RecordingCommitTarget::default())
            .with_fork_resolver(LinearForkResolverFactory::default())
            .build()
            .unwrap_err();
        assert_eq!(err, LoaderError::MissingComponent("historical source factory"));
    }

    #[test]
    fn test_build_validates_config() {
        let err = LoaderBuilder::default()
            .with_commit_target(RecordingCommitTarget::default())
            .with_historical_source(VecHistoricalFactory::default())
            .with_fork_resolver(LinearForkResolverFactory::default())
            .with_config(LoaderConfig::default().with_batch_size(0))
            .build()
            .unwrap_err();
        assert_eq!(err, LoaderError::Config(ConfigError::ZeroBatchSize));
    }

    #[tokio::test]
    async fn test_launch_without_pipeline_fails() {
        let mut loader = default_loader(VecHistoricalFactory::default());
        assert_eq!(loader.launch().await, Err(LoaderError::PipelineNotBuilt));
    }

    #[tokio::test]
    async fn test_batch_replay_stops_cleanly_at_stop_block_group() {
        let historical = VecHistoricalFactory::new(chain(999..=2_100)).hold_open();
        let forks = LinearForkResolverFactory { finality_group: 3, confirmations: 0 };
        let mut loader = loader(RecordingCommitTarget::default(), historical.clone(), forks);
        loader.stop_before_block(2_000);

        loader.build_pipeline_batch(1_000, &FixedStartBlockResolver::new(999)).await.unwrap();
        assert_eq!(loader.mode(), Some(PipelineMode::Batch));
        assert_eq!(loader.launch().await, Ok(()));

        let target = loader.target();
        assert_eq!(historical.starts(), vec![999]);
        assert_eq!(target.puts(), (1_000..=2_000).collect::<Vec<_>>());
        assert_eq!(target.finalized(), (999..=2_000).collect::<Vec<_>>());
        assert_eq!(target.ops().last(), Some(&CommitOp::Flush));
        assert!(loader.shutter().is_terminating());
        assert_eq!(loader.shutter().cause(), None);
        assert!(loader.healthy());
    }

    #[tokio::test]
    async fn test_live_resumes_after_last_irreversible() {
        let lib = block_at(10).block_ref();
        let target = RecordingCommitTarget::default().with_last_irreversible(lib);
        let historical = VecHistoricalFactory::new(chain(1..=20)).hold_open();
        let live = VecLiveFactory::new(chain(18..=25));
        let mut loader = loader(target, historical.clone(), LinearForkResolverFactory::default());

        loader.build_pipeline_live(&live, false).await.unwrap();
        let target = Arc::clone(&loader.target);
        let shutter = loader.shutter().clone();
        let handle = tokio::spawn(async move {
            let result = loader.launch().await;
            (loader, result)
        });

        wait_for(|| target.finalized().contains(&25)).await;
        shutter.shutdown(None);
        let (loader, result) = handle.await.unwrap();

        assert_eq!(result, Ok(()));
        assert_eq!(historical.starts(), vec![10]);
        assert_eq!(live.requesters(), vec!["blockloader".to_string()]);
        assert_eq!(target.puts(), (11..=25).collect::<Vec<_>>());
        assert_eq!(target.finalized(), (11..=25).collect::<Vec<_>>());
        assert!(loader.healthy());
    }

    #[tokio::test]
    async fn test_live_resumes_from_live_feed_when_history_is_missing() {
        let lib = block_at(10).block_ref();
        let target = RecordingCommitTarget::default().with_last_irreversible(lib);
        let historical = VecHistoricalFactory::new(Vec::new()).hold_open();
        let live = VecLiveFactory::new(chain(8..=25));
        let mut loader = loader(target, historical.clone(), LinearForkResolverFactory::default());

        loader.build_pipeline_live(&live, false).await.unwrap();
        let target = Arc::clone(&loader.target);
        let shutter = loader.shutter().clone();
        let handle = tokio::spawn(async move { loader.launch().await });

        wait_for(|| target.finalized().contains(&25)).await;
        shutter.shutdown(None);

        assert_eq!(handle.await.unwrap(), Ok(()));
        assert_eq!(historical.starts(), vec![10]);
        assert_eq!(target.puts(), (11..=25).collect::<Vec<_>>());
        assert_eq!(target.finalized(), (11..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_live_on_empty_table_starts_at_first_streamable_block() {
        let historical = VecHistoricalFactory::new(chain(1..=5));
        let live = VecLiveFactory::new(Vec::new());
        let mut loader = loader(
            RecordingCommitTarget::default(),
            historical.clone(),
            LinearForkResolverFactory::default(),
        );

        loader.build_pipeline_live(&live, true).await.unwrap();
        let target = Arc::clone(&loader.target);
        let shutter = loader.shutter().clone();
        let handle = tokio::spawn(async move { loader.launch().await });

        wait_for(|| target.finalized().contains(&5)).await;
        shutter.shutdown(None);

        assert_eq!(handle.await.unwrap(), Ok(()));
        assert_eq!(historical.starts(), vec![1]);
        assert_eq!(
            target.ops()[..3],
            [CommitOp::Put(0), CommitOp::Finalize(0), CommitOp::Put(1)]
        );
        assert_eq!(target.puts(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_live_on_empty_table_requires_permission() {
        let mut loader = default_loader(VecHistoricalFactory::default());

        let err = loader.build_pipeline_live(&VecLiveFactory::default(), false).await.unwrap_err();

        let expected = LoaderError::Resolve(ResolveError::LastIrreversible(CommitError::NotFound));
        assert_eq!(err, expected);
        assert_eq!(loader.shutter().cause(), Some(expected));
        assert_eq!(loader.mode(), None);
    }

    #[tokio::test]
    async fn test_live_lookup_failure_is_fatal() {
        let target = RecordingCommitTarget::default()
            .with_lookup_error(CommitError::Backend("connection refused".into()));
        let mut loader = loader(
            target,
            VecHistoricalFactory::default(),
            LinearForkResolverFactory::default(),
        );

        let err = loader.build_pipeline_live(&VecLiveFactory::default(), true).await.unwrap_err();

        assert!(matches!(err, LoaderError::Resolve(ResolveError::LastIrreversible(_))));
        assert!(loader.shutter().is_terminating());
    }

    #[tokio::test]
    async fn test_start_block_resolution_failure_shuts_down() {
        let mut loader = default_loader(VecHistoricalFactory::default());

        let err = loader
            .build_pipeline_batch(500, &FixedStartBlockResolver::failing())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LoaderError::Resolve(ResolveError::StartBlock {
                start: 500,
                reason: "no block index".to_string()
            })
        );
        assert_eq!(loader.shutter().cause(), Some(err));
    }

    #[tokio::test]
    async fn test_unexpected_source_end_marks_unhealthy() {
        let historical = VecHistoricalFactory::new(chain(1..=10));
        let mut loader = default_loader(historical);

        loader.build_pipeline_batch(1, &FixedStartBlockResolver::new(1)).await.unwrap();
        assert_eq!(loader.launch().await, Ok(()));

        assert_eq!(loader.target().finalized(), (0..=10).collect::<Vec<_>>());
        assert!(loader.shutter().is_terminating());
        assert!(!loader.healthy());
    }

    #[tokio::test]
    async fn test_write_failure_terminates_with_cause() {
        let target = RecordingCommitTarget::default().fail_put_at(3);
        let historical = VecHistoricalFactory::new(chain(1..=10)).hold_open();
        let mut loader = loader(target, historical, LinearForkResolverFactory::default());

        loader.build_pipeline_batch(1, &FixedStartBlockResolver::new(1)).await.unwrap();
        let err = loader.launch().await.unwrap_err();

        assert!(matches!(err, LoaderError::StoreBlock { number: 3, .. }));
        assert_eq!(loader.target().puts(), vec![0, 1, 2]);
        assert!(!loader.healthy());
    }

    #[tokio::test]
    async fn test_patch_replay_never_writes() {
        let historical = VecHistoricalFactory::new(chain(1..=20)).hold_open();
        let mut loader = default_loader(historical);
        loader.stop_before_block(8);

        loader.build_pipeline_patch(1, &FixedStartBlockResolver::new(1)).await.unwrap();
        assert_eq!(loader.mode(), Some(PipelineMode::Patch));
        assert_eq!(loader.launch().await, Ok(()));

        let target = loader.target();
        assert!(target.puts().is_empty());
        assert!(target.finalized().is_empty());
        assert!(target.flushes() > 0);
        assert!(loader.healthy());
    }

    #[tokio::test]
    async fn test_loader_shutdown_stops_running_pipeline() {
        let historical = VecHistoricalFactory::new(chain(1..=3)).hold_open();
        let mut loader = default_loader(historical);
        loader.build_pipeline_batch(1, &FixedStartBlockResolver::new(1)).await.unwrap();

        let target = Arc::clone(&loader.target);
        let shutter = loader.shutter().clone();
        let handle = tokio::spawn(async move { loader.launch().await });

        wait_for(|| target.finalized().contains(&3)).await;
        shutter.shutdown(Some(LoaderError::PipelineNotBuilt));

        assert_eq!(handle.await.unwrap(), Err(LoaderError::PipelineNotBuilt));
    }
}
