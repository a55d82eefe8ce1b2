//! Chunk processing: classify every row of one chunk and store one result.
//!
//! A chunk reads the job input and context from the object store, so any
//! worker can run any chunk. Rows are classified on a bounded rayon pool and
//! the result is written with a full overwrite keyed by chunk id.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{info, warn};

use crate::error::AppError;
use crate::pipeline::chunk::{
    ChunkResult, ChunkStatus, ChunkSummary, ChunkTask, RejectedRow, ReviewedRow,
};
use crate::storage::jobs::{self, JobContext};
use crate::storage::ObjectStore;
use crate::streaming::CsvInput;
use crate::validation::{
    classify, Classification, ListingEnricher, Outcome, Policy, RawRecord, Record,
    RecordEnricher, Schema, Taxonomy,
};

// ─────────────────────────────────────────────────────────────────────────────
// RowClassifier
// ─────────────────────────────────────────────────────────────────────────────

/// Rows of one chunk split by outcome, in input order.
#[derive(Debug, Clone, Default)]
pub struct Partitions {
    pub valid: Vec<Record>,
    pub needs_review: Vec<ReviewedRow>,
    pub rejected: Vec<RejectedRow>,
    pub summary: ChunkSummary,
}

/// Parallel rule engine runner shared by chunk workers and batch runs.
pub struct RowClassifier {
    pool: Arc<ThreadPool>,
    enrichers: Vec<Arc<dyn RecordEnricher>>,
}

impl RowClassifier {
    /// Builds a classifier with its own pool of `threads` workers.
    pub fn new(threads: usize, enrichers: Vec<Arc<dyn RecordEnricher>>) -> Result<Self, AppError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("classify-{i}"))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build classify pool: {e}")))?;

        let names: Vec<&str> = enrichers.iter().map(|e| e.name()).collect();
        info!(
            "[CLASSIFIER] {} classify threads, enrichers: [{}]",
            pool.current_num_threads(),
            names.join(", ")
        );

        Ok(Self {
            pool: Arc::new(pool),
            enrichers,
        })
    }

    /// Classifier with the built-in listing enricher when `enrich` is set.
    pub fn with_default_enrichers(threads: usize, enrich: bool) -> Result<Self, AppError> {
        let enrichers: Vec<Arc<dyn RecordEnricher>> = if enrich {
            vec![Arc::new(ListingEnricher)]
        } else {
            Vec::new()
        };
        Self::new(threads, enrichers)
    }

    /// Classifies and enriches `rows`. Blocking: call from a blocking context.
    pub fn classify_rows(
        &self,
        rows: &[RawRecord],
        schema: &Schema,
        taxonomy: &Taxonomy,
        policy: Policy,
    ) -> Partitions {
        let classified: Vec<Classification> = self.pool.install(|| {
            rows.par_iter()
                .map(|raw| {
                    let mut classification = classify(raw, schema, taxonomy, policy);
                    if let Some(record) = classification.record.as_mut() {
                        for enricher in &self.enrichers {
                            enricher.enrich(record);
                        }
                    }
                    classification
                })
                .collect()
        });

        let mut parts = Partitions::default();
        for (raw, classification) in rows.iter().zip(classified) {
            parts.summary.record(&classification);

            let Classification {
                outcome,
                record,
                errors,
                fixes,
                warnings,
                ..
            } = classification;

            match (outcome, record) {
                (Outcome::Valid, Some(record)) => parts.valid.push(record),
                (Outcome::NeedsReview, Some(record)) => parts.needs_review.push(ReviewedRow {
                    record,
                    errors,
                    fixes,
                }),
                _ => parts.rejected.push(RejectedRow {
                    line: raw.line,
                    raw: raw.fields.clone(),
                    errors,
                    warnings,
                }),
            }
        }

        #[cfg(debug_assertions)]
        tracing::debug!(
            rows = rows.len(),
            valid = parts.summary.valid_count,
            needs_review = parts.summary.needs_review_count,
            rejected = parts.summary.rejected_count,
            "Classified rows"
        );

        parts
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChunkProcessor
// ─────────────────────────────────────────────────────────────────────────────

/// Runs one chunk end to end.
#[derive(Clone)]
pub struct ChunkProcessor {
    store: Arc<dyn ObjectStore>,
    classifier: Arc<RowClassifier>,
}

impl ChunkProcessor {
    pub fn new(store: Arc<dyn ObjectStore>, classifier: Arc<RowClassifier>) -> Self {
        Self { store, classifier }
    }

    /// Processes `task` and stores its result, replacing any previous one.
    ///
    /// Unparseable rows fail the chunk as a unit: a `Failed` result is stored
    /// and returned as success, since retrying cannot change the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error, and stores nothing, if:
    ///
    /// - the job has no manifest (`NotFound`)
    /// - the task's chunk id or row range is not in the job's plan
    ///   (`InvalidRequest`)
    /// - the job input or context cannot be read, or the result cannot be
    ///   written
    pub async fn process(&self, task: &ChunkTask) -> Result<ChunkSummary, AppError> {
        let store = self.store.as_ref();

        jobs::manifest_for_task(store, task).await?;

        let context = jobs::read_context(store, &task.job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("context for job {}", task.job_id)))?;
        let input = store
            .get(&jobs::input_key(&task.job_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("input for job {}", task.job_id)))?;

        let classifier = self.classifier.clone();
        let blocking_task = task.clone();
        let result = tokio::task::spawn_blocking(move || {
            build_result(&classifier, &blocking_task, &input, &context)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Chunk task failed: {e}")))?;

        jobs::save_chunk_result(store, &result).await?;

        match result.status {
            ChunkStatus::Completed => info!(
                "[CHUNK-PROCESSOR] {}/{} rows [{}, {}): valid={} needs_review={} rejected={}",
                task.job_id,
                task.chunk_id,
                task.row_range.start,
                task.row_range.end,
                result.summary.valid_count,
                result.summary.needs_review_count,
                result.summary.rejected_count
            ),
            ChunkStatus::Failed => warn!(
                "[CHUNK-PROCESSOR] {}/{} failed: {}",
                task.job_id,
                task.chunk_id,
                result.error.as_deref().unwrap_or_default()
            ),
        }

        Ok(result.summary)
    }
}

fn build_result(
    classifier: &RowClassifier,
    task: &ChunkTask,
    input: &[u8],
    context: &JobContext,
) -> ChunkResult {
    let csv = CsvInput::new(input);
    let parsed = csv
        .headers()
        .and_then(|headers| Schema::from_headers(&headers))
        .and_then(|schema| Ok((csv.read_range(task.row_range)?, schema)));

    let (rows, schema) = match parsed {
        Ok(parsed) => parsed,
        Err(e) => return ChunkResult::failed(task, e.to_string()),
    };

    let parts = classifier.classify_rows(&rows, &schema, &context.taxonomy, context.policy);

    ChunkResult {
        job_id: task.job_id.clone(),
        chunk_id: task.chunk_id.clone(),
        row_range: task.row_range,
        status: ChunkStatus::Completed,
        error: None,
        summary: parts.summary,
        valid: parts.valid,
        needs_review: parts.needs_review,
        rejected: parts.rejected,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
