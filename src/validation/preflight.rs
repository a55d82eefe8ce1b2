//! File-level checks run before a job or a synchronous run starts.
//!
//! Any failure here is fatal for the whole input: no job is created and no
//! rows are classified. Row-level problems are left to the rule engine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::streaming::CsvInput;
use crate::validation::schema::Schema;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Detected line ending style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineEndings {
    /// Unix-style line endings (\n).
    LF,
    /// Windows-style line endings (\r\n).
    CRLF,
    /// Mixed line endings (both \n and \r\n found).
    Mixed,
    /// No line endings detected (single line or empty).
    Unknown,
}

/// Non-fatal observations about an input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputWarning {
    /// File starts with UTF-8 BOM.
    HasBom,
    /// File contains mixed line endings.
    MixedLineEndings,
    /// Columns that map to no catalog field and are ignored.
    UnmappedColumns { columns: Vec<String> },
}

/// What preflight learned about an input.
#[derive(Debug, Clone)]
pub struct InputProfile {
    pub schema: Schema,
    pub total_rows: u64,
    pub size_bytes: u64,
    pub line_endings: LineEndings,
    pub warnings: Vec<InputWarning>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Checks an in-memory input and counts its data rows.
///
/// # Errors
///
/// Returns `AppError::InputUnreadable` if the input is empty, larger than
/// `max_bytes`, has no readable UTF-8 header, or lacks a required column.
pub fn inspect(bytes: &[u8], max_bytes: usize) -> Result<InputProfile, AppError> {
    if bytes.is_empty() {
        return Err(AppError::InputUnreadable("File is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::InputUnreadable(format!(
            "File is {} bytes, limit is {} bytes",
            bytes.len(),
            max_bytes
        )));
    }

    let input = CsvInput::new(bytes);
    let mut warnings = Vec::new();
    if input.has_bom() {
        warnings.push(InputWarning::HasBom);
    }

    let line_endings = detect_line_endings(input.data());
    if line_endings == LineEndings::Mixed {
        warnings.push(InputWarning::MixedLineEndings);
    }

    let headers = input.headers()?;
    let schema = Schema::from_headers(&headers)?;

    let unmapped = schema.unmapped_columns();
    if !unmapped.is_empty() {
        warnings.push(InputWarning::UnmappedColumns { columns: unmapped });
    }

    let total_rows = input.count_rows()?;

    Ok(InputProfile {
        schema,
        total_rows,
        size_bytes: bytes.len() as u64,
        line_endings,
        warnings,
    })
}

/// Reads a local input file, enforcing the size limit before loading it.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the file does not exist and
/// `AppError::InputUnreadable` if it cannot be read or is too large.
pub async fn read_input_file(path: &Path, max_bytes: usize) -> Result<Vec<u8>, AppError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound(format!("file {}", path.display())));
        }
        Err(e) => {
            return Err(AppError::InputUnreadable(format!(
                "Failed to read file metadata: {}",
                e
            )))
        }
    };

    if !metadata.is_file() {
        return Err(AppError::InputUnreadable(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > max_bytes as u64 {
        return Err(AppError::InputUnreadable(format!(
            "File is {} bytes, limit is {} bytes",
            metadata.len(),
            max_bytes
        )));
    }

    tokio::fs::read(path)
        .await
        .map_err(|e| AppError::InputUnreadable(format!("Failed to read file: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Detects line ending style in the given bytes.
fn detect_line_endings(data: &[u8]) -> LineEndings {
    let mut has_lf = false;
    let mut has_crlf = false;

    let mut i = 0;
    while i < data.len() {
        if data[i] == b'\r' && i + 1 < data.len() && data[i + 1] == b'\n' {
            has_crlf = true;
            i += 2;
        } else if data[i] == b'\n' {
            has_lf = true;
            i += 1;
        } else {
            i += 1;
        }
    }

    match (has_lf, has_crlf) {
        (true, true) => LineEndings::Mixed,
        (true, false) => LineEndings::LF,
        (false, true) => LineEndings::CRLF,
        (false, false) => LineEndings::Unknown,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
