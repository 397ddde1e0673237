//! Delimited-text reader with delimiter probing.
//!
//! Candidates are tried in a fixed order and the first one that yields at
//! least one row wins, even if a later candidate would fit better.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use deltalake::arrow::array::{ArrayRef, RecordBatch};
use deltalake::arrow::datatypes::{Field, Schema};
use encoding_rs::WINDOWS_1252;
use snafu::prelude::*;
use tracing::debug;

use super::inference::{Cell, build_text_column, field_for, infer_cells, unique_headers};
use super::table::RawTable;
use super::traits::TabularReader;
use crate::error::{BuildBatchSnafu, CsvSnafu, OpenFileSnafu, ReadError};

/// Delimiters probed, in order.
pub const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Reader for `.csv` files.
#[derive(Debug, Clone)]
pub struct CsvReader {
    sample_rows: usize,
}

impl CsvReader {
    pub fn new(sample_rows: usize) -> Self {
        Self {
            sample_rows: sample_rows.max(1),
        }
    }
}

/// Header plus column-major raw values.
struct ParsedText {
    headers: Vec<String>,
    columns: Vec<Vec<Option<String>>>,
    rows: usize,
}

impl ParsedText {
    fn new(headers: Vec<String>) -> Self {
        let columns = vec![Vec::new(); headers.len()];
        Self {
            headers,
            columns,
            rows: 0,
        }
    }

    /// Append one row; missing trailing fields are null, extra fields dropped.
    fn push<'a>(&mut self, mut fields: impl Iterator<Item = &'a str>) {
        for column in &mut self.columns {
            column.push(fields.next().map(str::to_string));
        }
        self.rows += 1;
    }
}

impl TabularReader for CsvReader {
    fn read(&self, path: &Path) -> Result<RawTable, ReadError> {
        let bytes = std::fs::read(path).context(OpenFileSnafu { path })?;
        let file_size = bytes.len() as u64;
        let text = decode_text(&bytes);

        for delimiter in DELIMITERS {
            match parse_lenient(&text, delimiter) {
                Ok(parsed) if parsed.rows > 0 => {
                    debug!(
                        file = %path.display(),
                        delimiter = %(delimiter as char).escape_default(),
                        rows = parsed.rows,
                        columns = parsed.headers.len(),
                        "Delimiter accepted"
                    );
                    return self.build(path, parsed, file_size);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(
                        file = %path.display(),
                        delimiter = %(delimiter as char).escape_default(),
                        error = %e,
                        "Delimiter rejected"
                    );
                }
            }
        }

        let parsed = parse_permissive(&text).context(CsvSnafu { path })?;
        if parsed.rows == 0 {
            return Ok(RawTable::empty(file_size));
        }
        debug!(file = %path.display(), rows = parsed.rows, "Read with permissive fallback");
        self.build(path, parsed, file_size)
    }
}

impl CsvReader {
    fn build(&self, path: &Path, parsed: ParsedText, file_size: u64) -> Result<RawTable, ReadError> {
        let mut fields: Vec<Field> = Vec::with_capacity(parsed.headers.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(parsed.headers.len());

        for (name, values) in parsed.headers.iter().zip(parsed.columns) {
            let sample: Vec<Cell> = values
                .iter()
                .take(self.sample_rows)
                .map(|v| v.as_deref().map_or(Cell::Empty, Cell::parse))
                .collect();
            let inferred = infer_cells(&sample, self.sample_rows);
            fields.push(field_for(name, inferred));
            arrays.push(build_text_column(values, inferred));
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
            .context(BuildBatchSnafu { path })?;
        Ok(RawTable::new(batch, file_size))
    }
}

/// Decode bytes as UTF-8 (BOM stripped), falling back to Windows-1252.
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0,
    }
}

fn reader_for(text: &str, delimiter: u8) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes())
}

/// Parse with one delimiter, skipping rows whose width differs from the header.
fn parse_lenient(text: &str, delimiter: u8) -> Result<ParsedText, csv::Error> {
    let mut reader = reader_for(text, delimiter);
    let headers = unique_headers(reader.headers()?.iter());
    let width = headers.len();
    let mut parsed = ParsedText::new(headers);

    for record in reader.records() {
        let record = record?;
        if record.len() != width {
            continue;
        }
        parsed.push(record.iter());
    }

    Ok(parsed)
}

/// Comma-delimited pass that keeps every row, padded or truncated to the header.
fn parse_permissive(text: &str) -> Result<ParsedText, csv::Error> {
    let mut reader = reader_for(text, b',');
    let headers = unique_headers(reader.headers()?.iter());
    let mut parsed = ParsedText::new(headers);
    if parsed.headers.is_empty() {
        return Ok(parsed);
    }

    for record in reader.records() {
        match record {
            Ok(record) => parsed.push(record.iter()),
            Err(e) => debug!(error = %e, "Skipping unreadable row"),
        }
    }

    Ok(parsed)
}
