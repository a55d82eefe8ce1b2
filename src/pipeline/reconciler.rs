//! Job status derived from storage.
//!
//! State is never stored. Each query reads the manifest and counts the chunk
//! results present, one listing page at a time. Only results whose chunk id
//! is in the manifest's plan count; any other key under the results prefix
//! is ignored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppError;
use crate::pipeline::chunk::{parse_chunk_id, ChunkStatus, ChunkSummary};
use crate::storage::jobs::{self, Manifest};
use crate::storage::ObjectStore;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    NotFound,
    Running,
    Done,
}

/// Response body of a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    /// 0 to 100.
    pub progress: u8,
    pub message: String,
}

/// Aggregate of every chunk result stored for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub state: JobState,
    pub total_rows: u64,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    #[serde(flatten)]
    pub counts: ChunkSummary,
    /// Chunks whose rows could not be parsed.
    pub failed_chunks: Vec<String>,
    /// Chunks that were never delivered to a worker.
    pub dispatch_failures: u64,
    pub created_at: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pure Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `floor(100 * completed / total)`, or 0 when there are no chunks.
pub fn compute_progress(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u128;
    ((completed * 100) / total as u128) as u8
}

pub fn derive_state(completed: u64, total: u64) -> JobState {
    if completed >= total {
        JobState::Done
    } else {
        JobState::Running
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciler
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    page_size: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Current state and progress of `job_id`.
    ///
    /// An unknown job is reported as `NOT_FOUND`, not as an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the store cannot be read.
    pub async fn status(&self, job_id: &str) -> Result<JobStatus, AppError> {
        let Some(manifest) = jobs::read_manifest(self.store.as_ref(), job_id).await? else {
            return Ok(JobStatus {
                job_id: job_id.to_string(),
                state: JobState::NotFound,
                progress: 0,
                message: "job not found".to_string(),
            });
        };

        let total = manifest.chunks_created;
        let completed = self
            .count_planned(&jobs::results_prefix(job_id), total)
            .await?;

        #[cfg(debug_assertions)]
        tracing::debug!(job_id, completed, total, "Reconciled job status");

        Ok(JobStatus {
            job_id: job_id.to_string(),
            state: derive_state(completed, total),
            progress: compute_progress(completed, total),
            message: format!("{completed}/{total} chunks processed"),
        })
    }

    /// Sums every stored chunk result of `job_id`. `None` when the job has no
    /// manifest.
    pub async fn summarize(&self, job_id: &str) -> Result<Option<JobSummary>, AppError> {
        let store = self.store.as_ref();
        let Some(manifest) = jobs::read_manifest(store, job_id).await? else {
            return Ok(None);
        };

        let mut counts = ChunkSummary::default();
        let mut failed_chunks = Vec::new();
        let mut completed: u64 = 0;

        let prefix = jobs::results_prefix(job_id);
        let mut start_after: Option<String> = None;
        loop {
            let page = store
                .list_page(&prefix, start_after.as_deref(), self.page_size)
                .await?;

            for key in page
                .keys
                .iter()
                .filter(|key| is_planned(key, &prefix, manifest.chunks_created))
            {
                let Some(result) = jobs::load_chunk_result(store, key).await? else {
                    warn!("[RECONCILER] {} disappeared while summarizing", key);
                    continue;
                };
                completed += 1;
                if result.status == ChunkStatus::Failed {
                    failed_chunks.push(result.chunk_id);
                }
                counts.merge(&result.summary);
            }

            match page.next_start_after {
                Some(marker) => start_after = Some(marker),
                None => break,
            }
        }

        let dispatch_failures = self
            .count_planned(&jobs::dispatch_failures_prefix(job_id), manifest.chunks_created)
            .await?;

        info!(
            "[RECONCILER] Job {} summary: {}/{} chunks, {} rows",
            job_id, completed, manifest.chunks_created, counts.total_rows
        );

        Ok(Some(build_summary(
            &manifest,
            completed,
            counts,
            failed_chunks,
            dispatch_failures,
        )))
    }

    /// Counts keys under `prefix` naming one of the first `total` chunks,
    /// holding one listing page at a time.
    async fn count_planned(&self, prefix: &str, total: u64) -> Result<u64, AppError> {
        let mut count: u64 = 0;
        let mut start_after: Option<String> = None;

        loop {
            let page = self
                .store
                .list_page(prefix, start_after.as_deref(), self.page_size)
                .await?;
            count += page
                .keys
                .iter()
                .filter(|key| is_planned(key, prefix, total))
                .count() as u64;

            match page.next_start_after {
                Some(marker) => start_after = Some(marker),
                None => return Ok(count),
            }
        }
    }
}

/// Whether `key` is `{prefix}{chunk_id}` for a chunk the manifest planned.
fn is_planned(key: &str, prefix: &str, total_chunks: u64) -> bool {
    key.strip_prefix(prefix)
        .and_then(parse_chunk_id)
        .is_some_and(|ordinal| ordinal < total_chunks)
}

fn build_summary(
    manifest: &Manifest,
    completed: u64,
    counts: ChunkSummary,
    failed_chunks: Vec<String>,
    dispatch_failures: u64,
) -> JobSummary {
    JobSummary {
        job_id: manifest.job_id.clone(),
        state: derive_state(completed, manifest.chunks_created),
        total_rows: manifest.total_rows,
        total_chunks: manifest.chunks_created,
        completed_chunks: completed,
        counts,
        failed_chunks,
        dispatch_failures,
        created_at: manifest.created_at,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
