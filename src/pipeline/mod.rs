//! Chunked job execution.
//!
//! The [`Dispatcher`] commits a job's manifest and fans chunks out through a
//! [`ChunkInvoker`]. Each chunk is run by a [`ChunkProcessor`] that writes one
//! result per chunk id. The [`Reconciler`] derives job state from the manifest
//! and the results present, without any shared counter.

pub mod batch;
pub mod chunk;
pub mod chunk_processor;
pub mod dispatcher;
pub mod invoker;
pub mod reconciler;
pub mod scheduler;

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

pub use batch::{BatchProcessor, BatchReport};
pub use chunk::{chunk_id, parse_chunk_id, ChunkResult, ChunkStatus, ChunkSummary, ChunkTask};
pub use chunk_processor::{ChunkProcessor, Partitions, RowClassifier};
pub use dispatcher::{CreatedJob, DispatchReport, Dispatcher};
pub use invoker::{ChunkInvoker, HttpInvoker, LocalInvoker, CHUNK_RUN_PATH};
pub use reconciler::{JobState, JobStatus, JobSummary, Reconciler};
pub use scheduler::{ChunkPermit, ChunkScheduler};

/// Backoff before retry `retry_index` (0 for the first retry), plus up to 20%
/// random jitter so retries of sibling chunks spread out.
pub(crate) fn retry_delay(retry: &RetryConfig, retry_index: u32) -> Duration {
    let base = retry.backoff(retry_index);
    let jitter_ceiling = (base.as_millis() as u64) / 5;
    if jitter_ceiling == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ceiling))
}
