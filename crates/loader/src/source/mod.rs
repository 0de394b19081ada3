//! Block sources and their composition.

use crate::SourceError;
use tokio::task::JoinHandle;

mod file;
pub use file::{DEFAULT_BUNDLE_SIZE, DEFAULT_RETRY_INTERVAL, FileSource, FileSourceFactory};

mod joining;
pub use joining::JoiningSource;

mod pipeline;
pub use pipeline::Pipeline;

mod resolver;
pub use resolver::IdentityStartBlockResolver;

/// Awaits a spawned source, mapping a panic or abort to [`SourceError::Task`].
pub(crate) async fn join_source(
    task: JoinHandle<Result<(), SourceError>>,
) -> Result<(), SourceError> {
    task.await.map_err(|err| SourceError::Task(err.to_string()))?
}
