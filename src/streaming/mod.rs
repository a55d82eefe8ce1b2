//! CSV input and output plumbing.
//!
//! Inputs are read record-aware by row range so quoted commas and newlines
//! never shift chunk boundaries. Outputs are written atomically: a partially
//! written report never replaces a previous one.

mod atomic_writer;
mod csv_chunker;

pub use atomic_writer::AtomicCsvWriter;
pub use csv_chunker::{
    chunk_count, chunk_range, line_number, plan_chunks, CsvInput, RowRange, UTF8_BOM,
};
