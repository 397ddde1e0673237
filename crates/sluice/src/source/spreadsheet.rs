//! Spreadsheet reader for `.xlsx` and `.xls` workbooks.
//!
//! The first worksheet is read and its first row is the header. If the
//! decoder chosen by extension fails, the content is sniffed instead, which
//! recovers workbooks saved under the wrong extension.

use std::io::{Cursor, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto, open_workbook_auto_from_rs};
use deltalake::arrow::array::{ArrayRef, RecordBatch};
use deltalake::arrow::datatypes::{Field, Schema};
use snafu::prelude::*;
use tracing::{debug, warn};

use super::inference::{Cell, build_column, field_for, infer_cells, unique_headers};
use super::table::RawTable;
use super::traits::TabularReader;
use crate::error::{
    BuildBatchSnafu, NoWorksheetSnafu, OpenFileSnafu, ReadError, WorkbookSnafu, WorksheetSnafu,
};

/// Reader for spreadsheet files.
#[derive(Debug, Clone)]
pub struct SpreadsheetReader {
    sample_rows: usize,
}

impl SpreadsheetReader {
    pub fn new(sample_rows: usize) -> Self {
        Self {
            sample_rows: sample_rows.max(1),
        }
    }

    fn build(&self, path: &Path, range: &Range<Data>, file_size: u64) -> Result<RawTable, ReadError> {
        let mut rows = range.rows();
        let Some(header_row) = rows.next() else {
            return Ok(RawTable::empty(file_size));
        };
        let headers = unique_headers(
            header_row
                .iter()
                .map(|d| cell_from_data(d).into_text().unwrap_or_default()),
        );

        let mut columns: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];
        for row in rows {
            let cells: Vec<Cell> = row.iter().map(cell_from_data).collect();
            if cells.iter().all(|c| *c == Cell::Empty) {
                continue;
            }
            let mut cells = cells.into_iter();
            for column in &mut columns {
                column.push(cells.next().unwrap_or(Cell::Empty));
            }
        }

        let num_rows = columns.first().map_or(0, Vec::len);
        if num_rows == 0 {
            return Ok(RawTable::empty(file_size));
        }

        let mut fields: Vec<Field> = Vec::with_capacity(headers.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(headers.len());
        for (name, cells) in headers.iter().zip(columns) {
            let inferred = infer_cells(&cells, self.sample_rows);
            fields.push(field_for(name, inferred));
            arrays.push(build_column(cells, inferred));
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
            .context(BuildBatchSnafu { path })?;
        debug!(
            file = %path.display(),
            rows = batch.num_rows(),
            columns = batch.num_columns(),
            "Worksheet decoded"
        );
        Ok(RawTable::new(batch, file_size))
    }
}

impl TabularReader for SpreadsheetReader {
    fn read(&self, path: &Path) -> Result<RawTable, ReadError> {
        let file_size = std::fs::metadata(path)
            .context(OpenFileSnafu { path })?
            .len();

        let range = match read_by_extension(path) {
            Ok(range) => range,
            Err(e) => {
                warn!(
                    file = %path.display(),
                    error = %e,
                    "Spreadsheet decoder failed, retrying with content sniffing"
                );
                read_sniffed(path)?
            }
        };

        self.build(path, &range, file_size)
    }
}

fn read_by_extension(path: &Path) -> Result<Range<Data>, ReadError> {
    let mut sheets = open_workbook_auto(path).context(WorkbookSnafu { path })?;
    first_worksheet(&mut sheets, path)
}

fn read_sniffed(path: &Path) -> Result<Range<Data>, ReadError> {
    let bytes = std::fs::read(path).context(OpenFileSnafu { path })?;
    let mut sheets = open_workbook_auto_from_rs(Cursor::new(bytes)).context(WorkbookSnafu { path })?;
    first_worksheet(&mut sheets, path)
}

fn first_worksheet<RS: Read + Seek>(
    sheets: &mut Sheets<RS>,
    path: &Path,
) -> Result<Range<Data>, ReadError> {
    sheets
        .worksheet_range_at(0)
        .context(NoWorksheetSnafu { path })?
        .context(WorksheetSnafu { path })
}

/// Map a native spreadsheet value onto the shared cell model.
fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::Bool(b) => Cell::Bool(*b),
        Data::Int(i) => Cell::Int(*i),
        Data::Float(f) => Cell::from_float(*f),
        Data::String(s) if s.trim().is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::DateTime(dt) => {
            if dt.is_duration() {
                match dt.as_duration() {
                    Some(d) => Cell::Text(format!("PT{}S", d.num_seconds())),
                    None => Cell::Text(dt.as_f64().to_string()),
                }
            } else {
                match dt.as_datetime() {
                    Some(ts) => Cell::Text(ts.format("%Y-%m-%dT%H:%M:%S").to_string()),
                    None => Cell::Text(dt.as_f64().to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltalake::arrow::array::{Array, BooleanArray, Float64Array, Int64Array, StringArray};
    use deltalake::arrow::datatypes::DataType;
    use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};
    use tempfile::TempDir;

    fn write_sample(path: &Path) {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let date_format = Format::new().set_num_format("yyyy-mm-dd");

        for (col, name) in ["id", "peso", "ativo", "nome", "data", ""].iter().enumerate() {
            sheet.write_string(0, col as u16, *name).unwrap();
        }
        for row in 1..=3u32 {
            sheet.write_number(row, 0, row as f64).unwrap();
            sheet.write_number(row, 1, 70.5 + row as f64).unwrap();
            sheet.write_boolean(row, 2, row % 2 == 0).unwrap();
            sheet.write_string(row, 3, format!("pessoa {row}")).unwrap();
            let date = ExcelDateTime::from_ymd(2024, 1, row as u8).unwrap();
            sheet
                .write_datetime_with_format(row, 4, &date, &date_format)
                .unwrap();
            sheet.write_string(row, 5, "x").unwrap();
        }
        workbook.save(path).unwrap();
    }

    #[test]
    fn test_reads_first_sheet_with_native_types() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pacientes.xlsx");
        write_sample(&path);

        let table = SpreadsheetReader::new(1000).read(&path).unwrap();

        assert_eq!(table.num_rows(), 3);
        assert_eq!(
            table.column_names(),
            vec!["id", "peso", "ativo", "nome", "data", "column_6"]
        );
        let batch = table.batch();
        let schema = batch.schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(schema.field(2).data_type(), &DataType::Boolean);
        assert_eq!(schema.field(4).data_type(), &DataType::Utf8);

        let ids = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.value(2), 3);
        let peso = batch.column(1).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(peso.value(0), 71.5);
        let ativo = batch.column(2).as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(ativo.value(1));
        let dates = batch.column(4).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(dates.value(0), "2024-01-01T00:00:00");
        assert_eq!(table.file_size_bytes(), std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_wrong_extension_recovered_by_sniffing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("exportado.xls");
        write_sample(&path);

        let table = SpreadsheetReader::new(1000).read(&path).unwrap();
        assert_eq!(table.num_rows(), 3);
    }

    #[test]
    fn test_header_only_sheet_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vazio.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "id").unwrap();
        sheet.write_string(0, 1, "nome").unwrap();
        workbook.save(&path).unwrap();

        let table = SpreadsheetReader::new(1000).read(&path).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_sparse_rows_padded_and_blank_rows_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sparse.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "a").unwrap();
        sheet.write_string(0, 1, "b").unwrap();
        sheet.write_number(1, 0, 1.0).unwrap();
        sheet.write_number(3, 1, 2.0).unwrap();
        workbook.save(&path).unwrap();

        let table = SpreadsheetReader::new(1000).read(&path).unwrap();

        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.batch().column(0).null_count(), 1);
        assert_eq!(table.batch().column(1).null_count(), 1);
    }

    #[test]
    fn test_garbage_is_read_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"not a workbook").unwrap();

        let err = SpreadsheetReader::new(1000).read(&path).unwrap_err();
        assert!(matches!(err, ReadError::Workbook { .. }));
    }
}
