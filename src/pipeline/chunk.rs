//! Chunk identity and the chunk result artifact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::streaming::RowRange;
use crate::validation::{
    Classification, ErrorKind, FixKind, Outcome, Record, RowError, RowWarning, WarningKind,
};

/// Stable chunk identifier for the chunk at `ordinal` (zero-based).
///
/// Zero-padded so lexical key order matches chunk order.
pub fn chunk_id(ordinal: u64) -> String {
    format!("chunk-{ordinal:05}")
}

/// Ordinal of a well-formed chunk id, the inverse of [`chunk_id`].
pub fn parse_chunk_id(id: &str) -> Option<u64> {
    let ordinal: u64 = id.strip_prefix("chunk-")?.parse().ok()?;
    (chunk_id(ordinal) == id).then_some(ordinal)
}

/// Invocation payload for one chunk of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTask {
    pub job_id: String,
    pub chunk_id: String,
    pub row_range: RowRange,
}

impl ChunkTask {
    pub fn new(job_id: impl Into<String>, ordinal: u64, row_range: RowRange) -> Self {
        Self {
            job_id: job_id.into(),
            chunk_id: chunk_id(ordinal),
            row_range,
        }
    }
}

/// Row counters for a chunk, or for a whole job when merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub total_rows: u64,
    pub valid_count: u64,
    pub needs_review_count: u64,
    pub rejected_count: u64,
    /// Every detected error, counted by kind.
    pub error_breakdown: BTreeMap<ErrorKind, u64>,
    /// Rows that were accepted with at least one repair.
    pub auto_fixed_count: u64,
    /// Every warning, counted by kind, whatever the row's outcome.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub warning_breakdown: BTreeMap<WarningKind, u64>,
}

impl ChunkSummary {
    pub fn record(&mut self, classification: &Classification) {
        self.total_rows += 1;
        match classification.outcome {
            Outcome::Valid => self.valid_count += 1,
            Outcome::NeedsReview => self.needs_review_count += 1,
            Outcome::Rejected => self.rejected_count += 1,
        }
        for error in &classification.errors {
            *self.error_breakdown.entry(error.kind).or_insert(0) += 1;
        }
        if !classification.fixes.is_empty() {
            self.auto_fixed_count += 1;
        }
        for warning in &classification.warnings {
            *self.warning_breakdown.entry(warning.kind).or_insert(0) += 1;
        }
    }

    pub fn merge(&mut self, other: &ChunkSummary) {
        self.total_rows += other.total_rows;
        self.valid_count += other.valid_count;
        self.needs_review_count += other.needs_review_count;
        self.rejected_count += other.rejected_count;
        for (kind, count) in &other.error_breakdown {
            *self.error_breakdown.entry(*kind).or_insert(0) += count;
        }
        self.auto_fixed_count += other.auto_fixed_count;
        for (kind, count) in &other.warning_breakdown {
            *self.warning_breakdown.entry(*kind).or_insert(0) += count;
        }
    }

    /// Holds when every processed row landed in exactly one bucket.
    pub fn is_balanced(&self) -> bool {
        self.valid_count + self.needs_review_count + self.rejected_count == self.total_rows
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    Completed,
    /// The chunk's rows could not be parsed; no row was classified.
    Failed,
}

/// An accepted row that was repaired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewedRow {
    pub record: Record,
    pub errors: Vec<RowError>,
    pub fixes: Vec<FixKind>,
}

/// A rejected row with its original values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub line: u64,
    pub raw: Vec<String>,
    pub errors: Vec<RowError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RowWarning>,
}

/// The single durable artifact a chunk produces.
///
/// Contains no timestamps, so processing the same chunk twice yields the
/// same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub job_id: String,
    pub chunk_id: String,
    pub row_range: RowRange,
    pub status: ChunkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: ChunkSummary,
    pub valid: Vec<Record>,
    pub needs_review: Vec<ReviewedRow>,
    pub rejected: Vec<RejectedRow>,
}

impl ChunkResult {
    /// A chunk that failed as a unit.
    pub fn failed(task: &ChunkTask, error: impl Into<String>) -> Self {
        Self {
            job_id: task.job_id.clone(),
            chunk_id: task.chunk_id.clone(),
            row_range: task.row_range,
            status: ChunkStatus::Failed,
            error: Some(error.into()),
            summary: ChunkSummary::default(),
            valid: Vec::new(),
            needs_review: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Field;

    fn classification(outcome: Outcome, kinds: &[ErrorKind], fixes: &[FixKind]) -> Classification {
        Classification {
            line: 2,
            outcome,
            record: None,
            errors: kinds
                .iter()
                .map(|k| RowError::new(*k, Some(Field::Price), "x"))
                .collect(),
            fixes: fixes.to_vec(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn chunk_ids_sort_in_ordinal_order() {
        assert_eq!(chunk_id(0), "chunk-00000");
        assert_eq!(chunk_id(42), "chunk-00042");
        assert!(chunk_id(9) < chunk_id(10));
    }

    #[test]
    fn only_canonical_chunk_ids_parse() {
        assert_eq!(parse_chunk_id("chunk-00000"), Some(0));
        assert_eq!(parse_chunk_id("chunk-00042"), Some(42));
        assert_eq!(parse_chunk_id("chunk-123456"), Some(123_456));
        assert_eq!(parse_chunk_id("chunk-1"), None);
        assert_eq!(parse_chunk_id("chunk-+0001"), None);
        assert_eq!(parse_chunk_id("not-a-chunk"), None);
        assert_eq!(parse_chunk_id("chunk-"), None);
    }

    #[test]
    fn summary_counts_outcomes_errors_and_fixed_rows() {
        let mut summary = ChunkSummary::default();
        summary.record(&classification(Outcome::Valid, &[], &[]));
        summary.record(&classification(
            Outcome::NeedsReview,
            &[ErrorKind::InvalidNumericValue, ErrorKind::InvalidNumericValue],
            &[FixKind::ClampedPrice, FixKind::DroppedRating],
        ));
        summary.record(&classification(Outcome::Rejected, &[ErrorKind::UnknownCategory], &[]));

        assert_eq!(summary.total_rows, 3);
        assert_eq!(
            (summary.valid_count, summary.needs_review_count, summary.rejected_count),
            (1, 1, 1)
        );
        assert_eq!(summary.error_breakdown[&ErrorKind::InvalidNumericValue], 2);
        assert_eq!(summary.error_breakdown[&ErrorKind::UnknownCategory], 1);
        assert_eq!(summary.auto_fixed_count, 1);
        assert!(summary.is_balanced());
    }

    #[test]
    fn merge_adds_counters() {
        let mut a = ChunkSummary::default();
        a.record(&classification(Outcome::Rejected, &[ErrorKind::MalformedRow], &[]));
        let mut b = ChunkSummary::default();
        b.record(&classification(Outcome::Rejected, &[ErrorKind::MalformedRow], &[]));
        b.record(&classification(Outcome::Valid, &[], &[]));

        a.merge(&b);
        assert_eq!(a.total_rows, 3);
        assert_eq!(a.rejected_count, 2);
        assert_eq!(a.error_breakdown[&ErrorKind::MalformedRow], 2);
        assert!(a.is_balanced());
    }

    #[test]
    fn warnings_are_counted_and_merged() {
        let mut flagged = classification(Outcome::Rejected, &[ErrorKind::MissingRequiredField], &[]);
        flagged.warnings = vec![
            RowWarning::new(WarningKind::ShortTitle, None, "x"),
            RowWarning::new(WarningKind::ZeroPriceInStock, None, "x"),
        ];
        let mut a = ChunkSummary::default();
        a.record(&flagged);
        a.record(&classification(Outcome::Valid, &[], &[]));
        let mut b = ChunkSummary::default();
        b.record(&flagged);

        a.merge(&b);
        assert_eq!(a.warning_breakdown[&WarningKind::ShortTitle], 2);
        assert_eq!(a.warning_breakdown[&WarningKind::ZeroPriceInStock], 2);
        // Warnings never move a row between buckets
        assert_eq!((a.valid_count, a.rejected_count), (1, 2));

        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["warning_breakdown"]["short_title"], 2);
        let quiet = serde_json::to_value(ChunkSummary::default()).unwrap();
        assert!(quiet.get("warning_breakdown").is_none());
    }

    #[test]
    fn error_breakdown_serializes_with_kind_names() {
        let mut summary = ChunkSummary::default();
        summary.record(&classification(
            Outcome::NeedsReview,
            &[ErrorKind::UnknownCategory],
            &[FixKind::FallbackCategory],
        ));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["error_breakdown"]["UnknownCategory"], 1);
    }
}
