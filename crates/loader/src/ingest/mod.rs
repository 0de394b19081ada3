//! The ingestion state machine.

mod flush;
pub use flush::FlushController;

mod progress;
pub use progress::ProgressTracker;

mod state;
pub use state::IngestState;

mod job;
pub use job::{FullJob, IngestJob, PatchJob};

mod ingestor;
pub use ingestor::Ingestor;
