//! Background summarization and embedding of newly seen functions.

pub mod queue;
pub mod scheduler;

pub use queue::{EnqueueOutcome, EnrichmentQueue, QueuedFunction};
pub use scheduler::{DrainReport, Enricher, EnrichmentScheduler};
