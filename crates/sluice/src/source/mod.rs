//! Tabular readers for landing-zone files.
//!
//! Dispatches on file extension to the delimited-text or spreadsheet reader;
//! both produce the same [`RawTable`] column model.

mod delimited;
mod inference;
mod spreadsheet;
mod table;
mod traits;

use std::path::Path;

pub use delimited::{CsvReader, DELIMITERS, decode_text};
pub use inference::{Cell, DEFAULT_SAMPLE_ROWS, Inferred, unique_headers};
pub use spreadsheet::SpreadsheetReader;
pub use table::{ColumnKind, RawTable};
pub use traits::TabularReader;

use crate::error::ReadError;

/// Supported source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Spreadsheet,
}

impl SourceFormat {
    /// Format for a lower- or mixed-case extension, without the dot.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "csv" => Some(SourceFormat::Csv),
            "xlsx" | "xls" => Some(SourceFormat::Spreadsheet),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Reader set used by the pipeline.
#[derive(Debug, Clone)]
pub struct SourceReaders {
    csv: CsvReader,
    spreadsheet: SpreadsheetReader,
}

impl SourceReaders {
    pub fn new(sample_rows: usize) -> Self {
        Self {
            csv: CsvReader::new(sample_rows),
            spreadsheet: SpreadsheetReader::new(sample_rows),
        }
    }

    pub fn reader_for(&self, format: SourceFormat) -> &dyn TabularReader {
        match format {
            SourceFormat::Csv => &self.csv,
            SourceFormat::Spreadsheet => &self.spreadsheet,
        }
    }

    /// Read `path` with the reader for `format`.
    pub fn read(&self, path: &Path, format: SourceFormat) -> Result<RawTable, ReadError> {
        self.reader_for(format).read(path)
    }
}

impl Default for SourceReaders {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_ROWS)
    }
}
