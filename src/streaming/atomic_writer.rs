//! Atomic CSV report writer.
//!
//! Rows go to a temporary file next to the destination. `finish()` renames it
//! into place; dropping the writer first discards everything written.

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::Writer;
use tempfile::NamedTempFile;

use crate::error::AppError;

/// A CSV writer whose output appears at its destination all at once or not at all.
pub struct AtomicCsvWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
    rows: u64,
}

impl AtomicCsvWriter {
    /// Opens a temporary file in the destination's directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CsvOutput` if the destination has no parent
    /// directory or the temporary file cannot be created.
    pub fn create(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if final_path.file_name().is_none() {
            return Err(AppError::CsvOutput(format!(
                "{} is not a file path",
                final_path.display()
            )));
        }

        let temp_file = NamedTempFile::new_in(parent_dir)
            .map_err(|e| AppError::CsvOutput(format!("Failed to create temporary file: {}", e)))?;

        Ok(Self {
            writer: Writer::from_writer(BufWriter::new(temp_file)),
            final_path,
            rows: 0,
        })
    }

    /// Writes the header row. Not counted in [`rows_written`](Self::rows_written).
    pub fn write_header<I, T>(&mut self, header: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(header)
            .map_err(|e| AppError::CsvOutput(format!("Failed to write header: {}", e)))
    }

    /// Writes one data row.
    pub fn write_row<I, T>(&mut self, row: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer.write_record(row).map_err(|e| {
            AppError::CsvOutput(format!("Failed to write row {}: {}", self.rows + 1, e))
        })?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Flushes and moves the file into place, replacing any previous file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CsvOutput` if flushing or renaming fails. The
    /// temporary file is removed in that case.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        let buf_writer = self.writer.into_inner().map_err(|e| {
            AppError::CsvOutput(format!("Failed to flush CSV writer: {}", e.error()))
        })?;

        let named_temp = buf_writer
            .into_inner()
            .map_err(|e| AppError::CsvOutput(format!("Failed to flush buffer: {}", e.error())))?;

        named_temp.persist(&self.final_path).map_err(|e| {
            AppError::CsvOutput(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        tracing::info!(
            "[OUTPUT] Wrote {} rows to {}",
            self.rows,
            self.final_path.display()
        );

        Ok(self.final_path)
    }
}
