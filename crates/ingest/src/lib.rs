//! The ingestion pipeline (spec.md §4.D): bounded event queue, burst-mode
//! circuit breaker, and the single-writer transaction that folds a
//! `command_end` event into the Store's aggregates.

pub mod burst;
pub mod pipeline;
pub mod queue;

pub use burst::{BurstConfig, BurstDecision, BurstTracker};
pub use pipeline::{Pipeline, PipelineConfig, SessionCacheInvalidator};
pub use queue::{EventQueue, QueuedEvent};

/// Run the ingestion writer loop: drain events as they arrive, idling
/// briefly when the queue is empty. Intended to be the single task
/// spawned by the daemon for the "ingestion writer" role (spec.md §5).
pub async fn run_writer_loop(pipeline: std::sync::Arc<Pipeline>, idle_backoff: std::time::Duration) {
    loop {
        if !pipeline.drain_one().await {
            tokio::time::sleep(idle_backoff).await;
        }
    }
}
