//! Job endpoints and the chunk worker endpoint.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::pipeline::{ChunkInvoker, ChunkTask, JobStatus, JobSummary, CHUNK_RUN_PATH};
use crate::state::AppState;
use crate::storage::jobs;
use crate::validation::Policy;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/{job_id}/status", get(job_status))
        .route("/jobs/{job_id}/summary", get(job_summary))
        .route(&format!("/{CHUNK_RUN_PATH}"), post(run_chunk))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Policy flags accepted as query parameters on upload.
#[derive(Debug, Default, Deserialize)]
pub struct CreateJobParams {
    pub auto_fix: Option<bool>,
    pub strict_mode: Option<bool>,
}

impl CreateJobParams {
    fn policy(&self) -> Policy {
        let defaults = Policy::default();
        Policy::new(
            self.auto_fix.unwrap_or(defaults.auto_fix),
            self.strict_mode.unwrap_or(defaults.strict_mode),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: String,
    pub status: String,
    pub total_rows: u64,
    pub total_chunks: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunChunkResponse {
    pub accepted: bool,
    pub chunk_id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /jobs`: the body is the raw CSV file.
async fn create_job(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CreateJobParams>,
    body: Bytes,
) -> Result<Json<CreateJobResponse>, AppError> {
    let policy = params.policy();
    let taxonomy = state.taxonomy_snapshot().await;

    let job = state
        .dispatcher
        .create_job(body.to_vec(), policy, taxonomy)
        .await?;

    info!(
        "[API] Job {} started ({} chunks)",
        job.job_id, job.total_chunks
    );

    // Dispatch keeps running after the response is sent
    Ok(Json(CreateJobResponse {
        job_id: job.job_id,
        status: "STARTED".to_string(),
        total_rows: job.total_rows,
        total_chunks: job.total_chunks,
    }))
}

/// `GET /jobs/{job_id}/status`: unknown jobs are `NOT_FOUND` with 200.
async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatus>, AppError> {
    Ok(Json(state.reconciler.status(&job_id).await?))
}

async fn job_summary(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSummary>, AppError> {
    state
        .reconciler
        .summarize(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))
}

/// `POST /chunks/run`: schedules a chunk on this process and returns 202.
///
/// Unknown jobs are 404. A chunk id or row range that is not in the job's
/// manifest is 400, so no stray result can be stored for the job.
async fn run_chunk(
    State(state): State<Arc<AppState>>,
    Json(task): Json<ChunkTask>,
) -> Result<(StatusCode, Json<RunChunkResponse>), AppError> {
    if task.row_range.start > task.row_range.end {
        return Err(AppError::InvalidRequest(format!(
            "row_range start {} is after end {}",
            task.row_range.start, task.row_range.end
        )));
    }

    jobs::manifest_for_task(state.store.as_ref(), &task).await?;
    state.worker.invoke(&task).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunChunkResponse {
            accepted: true,
            chunk_id: task.chunk_id,
        }),
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
