//! Record-aware CSV reading by row range.
//!
//! Uses the `csv` crate so embedded commas and newlines inside quoted fields
//! never shift row boundaries. Rows are addressed by their zero-based data
//! index (the header is not a row), which lets independent chunk workers read
//! disjoint ranges of the same input.

use csv::{ByteRecord, Reader, ReaderBuilder};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::validation::RawRecord;

/// UTF-8 BOM bytes.
pub const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Half-open range `[start, end)` of zero-based data-row indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    pub start: u64,
    pub end: u64,
}

impl RowRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Number of chunks needed for `total_rows` at `chunk_size` rows each.
pub fn chunk_count(total_rows: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    total_rows.div_ceil(chunk_size)
}

/// Splits `total_rows` into consecutive ranges of at most `chunk_size` rows.
///
/// The last range may be shorter. Zero rows yields no ranges.
pub fn plan_chunks(total_rows: u64, chunk_size: u64) -> Vec<RowRange> {
    (0..chunk_count(total_rows, chunk_size))
        .filter_map(|i| chunk_range(total_rows, chunk_size, i))
        .collect()
}

/// The range `plan_chunks` assigns to chunk `ordinal`, or `None` past the
/// last chunk.
pub fn chunk_range(total_rows: u64, chunk_size: u64, ordinal: u64) -> Option<RowRange> {
    if ordinal >= chunk_count(total_rows, chunk_size) {
        return None;
    }
    let start = ordinal * chunk_size;
    Some(RowRange::new(start, (start + chunk_size).min(total_rows)))
}

/// A CSV document held in memory, with any UTF-8 BOM stripped.
#[derive(Debug, Clone, Copy)]
pub struct CsvInput<'a> {
    data: &'a [u8],
    has_bom: bool,
}

impl<'a> CsvInput<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        match bytes.strip_prefix(UTF8_BOM) {
            Some(rest) => Self {
                data: rest,
                has_bom: true,
            },
            None => Self {
                data: bytes,
                has_bom: false,
            },
        }
    }

    pub fn has_bom(&self) -> bool {
        self.has_bom
    }

    /// Content without the BOM.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Reads the header row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InputUnreadable` if there is no header row or it is
    /// not valid UTF-8.
    pub fn headers(&self) -> Result<Vec<String>, AppError> {
        let mut reader = self.reader();
        let headers = reader
            .byte_headers()
            .map_err(|e| AppError::InputUnreadable(format!("Failed to read CSV headers: {}", e)))?;

        if headers.is_empty() {
            return Err(AppError::InputUnreadable("CSV file has no header row".to_string()));
        }

        headers
            .iter()
            .map(|h| {
                std::str::from_utf8(h).map(str::to_string).map_err(|_| {
                    AppError::InputUnreadable("CSV header row is not valid UTF-8".to_string())
                })
            })
            .collect()
    }

    /// Counts data rows (the header excluded).
    pub fn count_rows(&self) -> Result<u64, AppError> {
        let mut reader = self.reader();
        let mut record = ByteRecord::new();
        let mut rows: u64 = 0;

        while read_next(&mut reader, &mut record, rows)? {
            rows += 1;
        }

        Ok(rows)
    }

    /// Reads the rows of `range`. Rows past the end of the input are simply absent.
    pub fn read_range(&self, range: RowRange) -> Result<Vec<RawRecord>, AppError> {
        let mut reader = self.reader();
        let mut record = ByteRecord::new();
        let mut index: u64 = 0;
        let mut rows = Vec::with_capacity(range.len().min(100_000) as usize);

        while index < range.end && read_next(&mut reader, &mut record, index)? {
            if index >= range.start {
                rows.push(RawRecord::from_byte_record(line_number(index), &record));
            }
            index += 1;
        }

        #[cfg(debug_assertions)]
        tracing::debug!(
            start = range.start,
            end = range.end,
            rows = rows.len(),
            "Read CSV row range"
        );

        Ok(rows)
    }

    /// Reads every data row.
    pub fn read_all(&self) -> Result<Vec<RawRecord>, AppError> {
        self.read_range(RowRange::new(0, u64::MAX))
    }

    fn reader(&self) -> Reader<&'a [u8]> {
        ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // Field count mismatches are row-level errors
            .from_reader(self.data)
    }
}

/// 1-based source line of a data row, assuming one line per record.
pub fn line_number(index: u64) -> u64 {
    index + 2
}

fn read_next(
    reader: &mut Reader<&[u8]>,
    record: &mut ByteRecord,
    index: u64,
) -> Result<bool, AppError> {
    reader.read_byte_record(record).map_err(|e| {
        AppError::InputUnreadable(format!(
            "Failed to read CSV record at line {}: {}",
            line_number(index),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(rows: &[RawRecord]) -> Vec<Vec<String>> {
        rows.iter().map(|r| r.fields.clone()).collect()
    }

    #[test]
    fn test_plan_chunks_record_limit() {
        // 5 rows with max 2 per chunk = [2, 2, 1]
        let ranges = plan_chunks(5, 2);
        assert_eq!(
            ranges,
            vec![RowRange::new(0, 2), RowRange::new(2, 4), RowRange::new(4, 5)]
        );
        assert_eq!(ranges.iter().map(RowRange::len).sum::<u64>(), 5);
    }

    #[test]
    fn test_chunk_count_is_ceiling() {
        assert_eq!(chunk_count(0, 1000), 0);
        assert_eq!(chunk_count(1, 1000), 1);
        assert_eq!(chunk_count(1000, 1000), 1);
        assert_eq!(chunk_count(1001, 1000), 2);
        assert!(plan_chunks(0, 10).is_empty());
    }

    #[test]
    fn test_chunk_range_matches_plan() {
        let plan = plan_chunks(7, 3);
        for (ordinal, range) in plan.iter().enumerate() {
            assert_eq!(chunk_range(7, 3, ordinal as u64), Some(*range));
        }
        assert_eq!(chunk_range(7, 3, 3), None);
        assert_eq!(chunk_range(0, 3, 0), None);
    }

    #[test]
    fn test_embedded_newline_integrity() {
        let input = CsvInput::new(b"Name,Desc\n\"John\",\"Line1\nLine2\"\nJane,Plain\n");

        assert_eq!(input.count_rows().unwrap(), 2);
        let rows = input.read_all().unwrap();
        assert_eq!(rows[0].fields, vec!["John", "Line1\nLine2"]);
        assert_eq!(rows[1].fields, vec!["Jane", "Plain"]);
    }

    #[test]
    fn test_embedded_comma_integrity() {
        let input = CsvInput::new(b"Name,Address\n\"John\",\"123 Main St, Apt 4\"\n");
        let rows = input.read_all().unwrap();
        assert_eq!(rows[0].fields[1], "123 Main St, Apt 4");
    }

    #[test]
    fn test_read_range_is_disjoint_and_numbered() {
        let input = CsvInput::new(b"Id,Name\n1,A\n2,B\n3,C\n4,D\n5,E\n");

        let middle = input.read_range(RowRange::new(2, 4)).unwrap();
        assert_eq!(fields(&middle), vec![vec!["3", "C"], vec!["4", "D"]]);
        assert_eq!(middle[0].line, 4);

        let all: Vec<RawRecord> = plan_chunks(5, 2)
            .into_iter()
            .flat_map(|r| input.read_range(r).unwrap())
            .collect();
        assert_eq!(all, input.read_all().unwrap());
    }

    #[test]
    fn test_range_past_end_is_truncated() {
        let input = CsvInput::new(b"Id\n1\n2\n");
        assert_eq!(input.read_range(RowRange::new(1, 10)).unwrap().len(), 1);
        assert!(input.read_range(RowRange::new(5, 10)).unwrap().is_empty());
    }

    #[test]
    fn test_ragged_rows_are_kept() {
        let input = CsvInput::new(b"a,b,c\n1,2\n1,2,3,4\n");
        let rows = input.read_all().unwrap();
        assert_eq!(rows[0].fields.len(), 2);
        assert_eq!(rows[1].fields.len(), 4);
    }

    #[test]
    fn test_bom_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"asin,title\nB1,T\n");
        let input = CsvInput::new(&bytes);

        assert!(input.has_bom());
        assert_eq!(input.headers().unwrap(), vec!["asin", "title"]);
    }

    #[test]
    fn test_empty_csv_no_data_rows() {
        let input = CsvInput::new(b"Id,Name\n");
        assert_eq!(input.count_rows().unwrap(), 0);
        assert!(input.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_no_header_returns_error() {
        let input = CsvInput::new(b"");
        match input.headers() {
            Err(AppError::InputUnreadable(msg)) => assert!(msg.contains("header")),
            other => panic!("Expected InputUnreadable, got {:?}", other),
        }
    }

    #[test]
    fn test_non_utf8_header_is_unreadable() {
        let input = CsvInput::new(b"as\xffin,title\nB1,T\n");
        assert!(matches!(input.headers(), Err(AppError::InputUnreadable(_))));
    }

    #[test]
    fn test_non_utf8_row_is_flagged_not_fatal() {
        let input = CsvInput::new(b"asin,title\nB1,Caf\xe9\nB2,Tea\n");
        let rows = input.read_all().unwrap();
        assert!(rows[0].encoding_error);
        assert!(!rows[1].encoding_error);
    }
}
