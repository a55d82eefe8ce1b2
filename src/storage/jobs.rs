//! Job persistence on top of the object store.
//!
//! Key layout:
//!
//! ```text
//! jobs/{job_id}/input/source.csv
//! jobs/{job_id}/context
//! jobs/{job_id}/manifest
//! jobs/{job_id}/results/{chunk_id}
//! jobs/{job_id}/dispatch-failures/{chunk_id}
//! catalog/taxonomy
//! ```
//!
//! The manifest is written with `create` and is never touched again. Chunk
//! results are written with `put`, so a re-delivered chunk replaces its
//! previous result instead of adding a second one.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::pipeline::chunk::{parse_chunk_id, ChunkResult, ChunkTask};
use crate::storage::object_store::ObjectStore;
use crate::streaming::{chunk_range, RowRange};
use crate::validation::{Policy, Taxonomy};

// ─────────────────────────────────────────────────────────────────────────────
// Keys
// ─────────────────────────────────────────────────────────────────────────────

/// Location of the current taxonomy, reloaded at startup.
pub const TAXONOMY_KEY: &str = "catalog/taxonomy";

pub fn input_key(job_id: &str) -> String {
    format!("jobs/{job_id}/input/source.csv")
}

pub fn context_key(job_id: &str) -> String {
    format!("jobs/{job_id}/context")
}

pub fn manifest_key(job_id: &str) -> String {
    format!("jobs/{job_id}/manifest")
}

/// Prefix under which every chunk result of a job lives.
pub fn results_prefix(job_id: &str) -> String {
    format!("jobs/{job_id}/results/")
}

pub fn result_key(job_id: &str, chunk_id: &str) -> String {
    format!("{}{chunk_id}", results_prefix(job_id))
}

pub fn dispatch_failures_prefix(job_id: &str) -> String {
    format!("jobs/{job_id}/dispatch-failures/")
}

pub fn dispatch_failure_key(job_id: &str, chunk_id: &str) -> String {
    format!("{}{chunk_id}", dispatch_failures_prefix(job_id))
}

// ─────────────────────────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable record of how many chunks a job was split into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: String,
    pub chunks_created: u64,
    pub total_rows: u64,
    pub chunk_size: u64,
    /// Unix seconds.
    pub created_at: i64,
}

impl Manifest {
    /// Row range planned for `chunk_id`, or `None` if the job has no such
    /// chunk.
    pub fn planned_range(&self, chunk_id: &str) -> Option<RowRange> {
        let ordinal = parse_chunk_id(chunk_id)?;
        if ordinal >= self.chunks_created {
            return None;
        }
        chunk_range(self.total_rows, self.chunk_size, ordinal)
    }

    /// Checks that `task` is one of the chunks this job was split into.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidRequest` if the chunk id is not planned or the row
    /// range differs from the planned one.
    pub fn verify_task(&self, task: &ChunkTask) -> Result<(), AppError> {
        match self.planned_range(&task.chunk_id) {
            None => Err(AppError::InvalidRequest(format!(
                "chunk {} is not part of job {} ({} chunks)",
                task.chunk_id, self.job_id, self.chunks_created
            ))),
            Some(planned) if planned != task.row_range => Err(AppError::InvalidRequest(format!(
                "chunk {} of job {} covers rows [{}, {}), not [{}, {})",
                task.chunk_id,
                self.job_id,
                planned.start,
                planned.end,
                task.row_range.start,
                task.row_range.end
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Inputs every chunk of a job is classified with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub policy: Policy,
    pub taxonomy: Taxonomy,
}

/// A chunk whose invocation could not be dispatched after all retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub job_id: String,
    pub chunk_id: String,
    pub attempts: u32,
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Writes the manifest once.
///
/// # Errors
///
/// Any failure, including an existing manifest, is `ManifestWriteFailed`.
pub async fn write_manifest(store: &dyn ObjectStore, manifest: &Manifest) -> Result<(), AppError> {
    let manifest_failed = |message: String| AppError::ManifestWriteFailed {
        job_id: manifest.job_id.clone(),
        message,
    };

    let body = serde_json::to_vec(manifest)
        .map_err(|e| manifest_failed(format!("Failed to serialize manifest: {e}")))?;

    store
        .create(&manifest_key(&manifest.job_id), body)
        .await
        .map_err(|e| manifest_failed(e.to_string()))
}

pub async fn read_manifest(
    store: &dyn ObjectStore,
    job_id: &str,
) -> Result<Option<Manifest>, AppError> {
    read_json(store, &manifest_key(job_id), "manifest").await
}

/// Loads the manifest of `task`'s job and checks the task against it.
///
/// # Errors
///
/// - `AppError::NotFound` if the job has no manifest
/// - `AppError::InvalidRequest` if the task is not a planned chunk
pub async fn manifest_for_task(
    store: &dyn ObjectStore,
    task: &ChunkTask,
) -> Result<Manifest, AppError> {
    let manifest = read_manifest(store, &task.job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("manifest for job {}", task.job_id)))?;
    manifest.verify_task(task)?;
    Ok(manifest)
}

pub async fn write_context(
    store: &dyn ObjectStore,
    job_id: &str,
    context: &JobContext,
) -> Result<(), AppError> {
    store
        .put(&context_key(job_id), encode(context, "job context")?)
        .await
}

pub async fn read_context(
    store: &dyn ObjectStore,
    job_id: &str,
) -> Result<Option<JobContext>, AppError> {
    read_json(store, &context_key(job_id), "job context").await
}

/// Stores a chunk result, replacing any earlier result for the same chunk.
pub async fn save_chunk_result(store: &dyn ObjectStore, result: &ChunkResult) -> Result<(), AppError> {
    store
        .put(
            &result_key(&result.job_id, &result.chunk_id),
            encode(result, "chunk result")?,
        )
        .await
}

/// Loads a chunk result by its full key, as returned by a results listing.
pub async fn load_chunk_result(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<Option<ChunkResult>, AppError> {
    read_json(store, key, "chunk result").await
}

pub async fn record_dispatch_failure(
    store: &dyn ObjectStore,
    failure: &DispatchFailure,
) -> Result<(), AppError> {
    store
        .put(
            &dispatch_failure_key(&failure.job_id, &failure.chunk_id),
            encode(failure, "dispatch failure")?,
        )
        .await
}

pub async fn save_taxonomy(store: &dyn ObjectStore, taxonomy: &Taxonomy) -> Result<(), AppError> {
    store.put(TAXONOMY_KEY, encode(taxonomy, "taxonomy")?).await
}

pub async fn load_taxonomy(store: &dyn ObjectStore) -> Result<Option<Taxonomy>, AppError> {
    read_json(store, TAXONOMY_KEY, "taxonomy").await
}

/// Returns current unix timestamp in seconds.
pub(crate) fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>, AppError> {
    serde_json::to_vec(value)
        .map_err(|e| AppError::Internal(format!("Failed to serialize {what}: {e}")))
}

async fn read_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
    what: &str,
) -> Result<Option<T>, AppError> {
    let Some(bytes) = store.get(key).await? else {
        return Ok(None);
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| AppError::Storage(format!("Corrupt {what} at {key}: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
