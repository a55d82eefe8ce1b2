//! Synchronous single-file processing.
//!
//! Classifies a whole file in one pass and writes two CSV reports next to
//! each other in the output directory:
//!
//! - `{stem}_valid.csv`: Valid and NeedsReview rows, cleaned
//! - `{stem}_rejected.csv`: Rejected rows with their original values

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::error::AppError;
use crate::pipeline::chunk::{RejectedRow, ReviewedRow};
use crate::pipeline::chunk_processor::{Partitions, RowClassifier};
use crate::streaming::{AtomicCsvWriter, CsvInput};
use crate::validation::{
    inspect, read_input_file, ErrorKind, Outcome, Policy, Record, RowError, Taxonomy, WarningKind,
};

const VALID_COLUMNS: &[&str] = &[
    "asin",
    "title",
    "price",
    "rating",
    "review_count",
    "rank",
    "stock",
    "category",
    "image_url",
    "_line_number",
    "_status",
    "_fixes",
    "_warnings",
    "_attributes",
];

const REJECTED_EXTRA_COLUMNS: &[&str] = &["_line_number", "_status", "_error_count", "_errors"];

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub error_breakdown: BTreeMap<ErrorKind, u64>,
    pub auto_fixed_count: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub warning_breakdown: BTreeMap<WarningKind, u64>,
}

/// Response of a synchronous run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub success: bool,
    pub total_lines: u64,
    pub valid_count: u64,
    pub needs_review_count: u64,
    pub rejected_count: u64,
    pub processing_time_seconds: f64,
    pub valid_output_ref: String,
    pub rejected_output_ref: String,
    pub summary: BatchSummary,
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchProcessor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BatchProcessor {
    output_dir: PathBuf,
    classifier: Arc<RowClassifier>,
    max_input_bytes: usize,
}

impl BatchProcessor {
    pub fn new(output_dir: PathBuf, classifier: Arc<RowClassifier>, max_input_bytes: usize) -> Self {
        Self {
            output_dir,
            classifier,
            max_input_bytes,
        }
    }

    /// Classifies every row of `path` and writes both reports.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if `path` does not exist
    /// - `AppError::InputUnreadable` if the file fails preflight
    /// - `AppError::CsvOutput` if a report cannot be written
    pub async fn process_file(
        &self,
        path: &Path,
        policy: Policy,
        taxonomy: Arc<Taxonomy>,
    ) -> Result<BatchReport, AppError> {
        let started = Instant::now();
        let input = read_input_file(path, self.max_input_bytes).await?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("input")
            .to_string();
        let valid_path = self.output_dir.join(format!("{stem}_valid.csv"));
        let rejected_path = self.output_dir.join(format!("{stem}_rejected.csv"));

        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            AppError::CsvOutput(format!(
                "Failed to create output directory {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;

        let classifier = self.classifier.clone();
        let max_input_bytes = self.max_input_bytes;
        let parts = tokio::task::spawn_blocking(move || {
            let profile = inspect(&input, max_input_bytes)?;
            let rows = CsvInput::new(&input).read_all()?;
            let parts = classifier.classify_rows(&rows, &profile.schema, &taxonomy, policy);

            write_valid_report(&valid_path, &parts.valid, &parts.needs_review)?;
            write_rejected_report(&rejected_path, profile.schema.headers(), &parts.rejected)?;
            Ok::<_, AppError>(parts)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Batch task failed: {e}")))??;

        let report = build_report(
            &parts,
            started.elapsed().as_secs_f64(),
            &self.output_dir.join(format!("{stem}_valid.csv")),
            &self.output_dir.join(format!("{stem}_rejected.csv")),
        );

        info!(
            "[BATCH] {}: {} rows (valid={} needs_review={} rejected={}) in {:.2}s",
            path.display(),
            report.total_lines,
            report.valid_count,
            report.needs_review_count,
            report.rejected_count,
            report.processing_time_seconds
        );

        Ok(report)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Report Writers
// ─────────────────────────────────────────────────────────────────────────────

fn write_valid_report(
    path: &Path,
    valid: &[Record],
    needs_review: &[ReviewedRow],
) -> Result<(), AppError> {
    let mut writer = AtomicCsvWriter::create(path)?;
    writer.write_header(VALID_COLUMNS)?;

    let mut rows: Vec<(&Record, Outcome, String)> = valid
        .iter()
        .map(|r| (r, Outcome::Valid, String::new()))
        .chain(needs_review.iter().map(|r| {
            let fixes: Vec<&str> = r.fixes.iter().map(|f| f.as_str()).collect();
            (&r.record, Outcome::NeedsReview, fixes.join(";"))
        }))
        .collect();
    rows.sort_by_key(|(record, _, _)| record.line);

    for (record, outcome, fixes) in rows {
        writer.write_row(valid_row(record, outcome, &fixes))?;
    }

    writer.finish()?;
    Ok(())
}

fn valid_row(record: &Record, outcome: Outcome, fixes: &str) -> Vec<String> {
    fn opt<T: ToString>(value: &Option<T>) -> String {
        value.as_ref().map(ToString::to_string).unwrap_or_default()
    }

    let warnings: Vec<&str> = record.warnings.iter().map(|w| w.kind.as_str()).collect();
    let attributes = if record.attributes.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&record.attributes).unwrap_or_default()
    };

    vec![
        record.identifier.clone(),
        record.title.clone(),
        format!("{:.2}", record.price),
        opt(&record.rating),
        opt(&record.review_count),
        opt(&record.rank),
        opt(&record.stock),
        opt(&record.category),
        opt(&record.image_url),
        record.line.to_string(),
        outcome.as_str().to_string(),
        fixes.to_string(),
        warnings.join(";"),
        attributes,
    ]
}

fn write_rejected_report(
    path: &Path,
    headers: &[String],
    rejected: &[RejectedRow],
) -> Result<(), AppError> {
    let mut writer = AtomicCsvWriter::create(path)?;
    writer.write_header(
        headers
            .iter()
            .map(String::as_str)
            .chain(REJECTED_EXTRA_COLUMNS.iter().copied()),
    )?;

    for row in rejected {
        // Malformed rows may be shorter or longer than the header
        let mut fields: Vec<String> = row.raw.iter().take(headers.len()).cloned().collect();
        fields.resize(headers.len(), String::new());

        fields.push(row.line.to_string());
        fields.push(Outcome::Rejected.as_str().to_string());
        fields.push(row.errors.len().to_string());
        fields.push(join_errors(&row.errors));
        writer.write_row(fields)?;
    }

    writer.finish()?;
    Ok(())
}

fn join_errors(errors: &[RowError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.kind.as_str(), e.message))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn build_report(
    parts: &Partitions,
    elapsed_seconds: f64,
    valid_path: &Path,
    rejected_path: &Path,
) -> BatchReport {
    let summary = &parts.summary;
    BatchReport {
        success: true,
        total_lines: summary.total_rows,
        valid_count: summary.valid_count,
        needs_review_count: summary.needs_review_count,
        rejected_count: summary.rejected_count,
        processing_time_seconds: (elapsed_seconds * 1000.0).round() / 1000.0,
        valid_output_ref: valid_path.display().to_string(),
        rejected_output_ref: rejected_path.display().to_string(),
        summary: BatchSummary {
            error_breakdown: summary.error_breakdown.clone(),
            auto_fixed_count: summary.auto_fixed_count,
            warning_breakdown: summary.warning_breakdown.clone(),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
