//! Column normalization before append.
//!
//! Rules, in order:
//! 1. Untyped (all-null) columns become Utf8.
//! 2. Nested columns are rendered to Utf8 text.
//! 3. Columns null in every row are dropped.
//! 4. Remaining nulls in Utf8 columns become `""`.
//!
//! Typed scalar columns keep their nulls. If the rules leave anything a bronze
//! table cannot hold, every column is rendered to text instead.

use std::sync::Arc;

use deltalake::arrow::array::{
    Array, ArrayRef, RecordBatch, RecordBatchOptions, StringArray, new_null_array,
};
use deltalake::arrow::compute::cast;
use deltalake::arrow::datatypes::{DataType, Field, Schema};
use deltalake::arrow::util::display::{ArrayFormatter, FormatOptions};
use snafu::prelude::*;
use tracing::{debug, warn};

use crate::error::{NormalizeError, RebuildSnafu, RenderSnafu};
use crate::source::{ColumnKind, RawTable};

/// A table whose columns can be appended to a bronze table.
///
/// No column is null-typed or nested, no column is null in every row, and
/// the row count equals the source table's.
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    batch: RecordBatch,
    dropped: Vec<String>,
    all_text: bool,
}

impl NormalizedTable {
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Names of the columns removed because they held no values.
    pub fn dropped_columns(&self) -> &[String] {
        &self.dropped
    }

    /// True when the all-text fallback produced this table.
    pub fn is_all_text(&self) -> bool {
        self.all_text
    }
}

/// Normalize a decoded table.
pub fn normalize(raw: &RawTable) -> Result<NormalizedTable, NormalizeError> {
    match apply_rules(raw) {
        Ok(table) => match ensure_appendable(&table.batch) {
            Ok(()) => Ok(table),
            Err(e) => {
                warn!(error = %e, "Normalization left unsupported columns, rendering all columns as text");
                render_all_text(raw)
            }
        },
        Err(e) => {
            warn!(error = %e, "Normalization failed, rendering all columns as text");
            render_all_text(raw)
        }
    }
}

fn apply_rules(raw: &RawTable) -> Result<NormalizedTable, NormalizeError> {
    let batch = raw.batch();
    let schema = batch.schema();
    let num_rows = batch.num_rows();

    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut columns = Vec::with_capacity(batch.num_columns());
    let mut dropped = Vec::new();
    let mut converted = 0usize;

    for ((field, column), kind) in schema.fields().iter().zip(batch.columns()).zip(raw.kinds()) {
        let name = field.name();

        let column: ArrayRef = match kind {
            ColumnKind::Null => {
                converted += 1;
                new_null_array(&DataType::Utf8, num_rows)
            }
            ColumnKind::Nested => {
                converted += 1;
                render_text(name, column, false)?
            }
            _ => column.clone(),
        };

        if num_rows > 0 && column.logical_null_count() == num_rows {
            debug!(column = %name, "Dropping column with no values");
            dropped.push(name.clone());
            continue;
        }

        let column = match ColumnKind::of(column.data_type()) {
            ColumnKind::String => fill_empty_strings(name, &column)?,
            _ => column,
        };

        fields.push(Field::new(name, column.data_type().clone(), true));
        columns.push(column);
    }

    if converted > 0 {
        warn!(columns = converted, "Converted untyped or nested columns to text");
    }

    Ok(NormalizedTable {
        batch: rebuild(fields, columns, num_rows)?,
        dropped,
        all_text: false,
    })
}

/// Last resort: every column as Utf8, nulls as `""`.
fn render_all_text(raw: &RawTable) -> Result<NormalizedTable, NormalizeError> {
    let batch = raw.batch();
    let schema = batch.schema();
    let num_rows = batch.num_rows();

    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut columns = Vec::with_capacity(batch.num_columns());
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        fields.push(Field::new(field.name(), DataType::Utf8, true));
        columns.push(render_text(field.name(), column, true)?);
    }

    let table = NormalizedTable {
        batch: rebuild(fields, columns, num_rows)?,
        dropped: Vec::new(),
        all_text: true,
    };
    ensure_appendable(&table.batch)?;
    Ok(table)
}

fn rebuild(
    fields: Vec<Field>,
    columns: Vec<ArrayRef>,
    num_rows: usize,
) -> Result<RecordBatch, NormalizeError> {
    RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        columns,
        &RecordBatchOptions::new().with_row_count(Some(num_rows)),
    )
    .context(RebuildSnafu)
}

/// Render each value with Arrow's display formatting.
///
/// Nulls stay null unless `nulls_as_empty` is set.
fn render_text(name: &str, column: &ArrayRef, nulls_as_empty: bool) -> Result<ArrayRef, NormalizeError> {
    if column.data_type() == &DataType::Null {
        let values = (0..column.len()).map(|_| nulls_as_empty.then_some(""));
        return Ok(Arc::new(values.collect::<StringArray>()));
    }

    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(column.as_ref(), &options).context(RenderSnafu { column: name })?;

    let values = (0..column.len()).map(|i| {
        if column.is_null(i) {
            nulls_as_empty.then(String::new)
        } else {
            Some(formatter.value(i).to_string())
        }
    });
    Ok(Arc::new(values.collect::<StringArray>()))
}

fn fill_empty_strings(name: &str, column: &ArrayRef) -> Result<ArrayRef, NormalizeError> {
    let utf8 = cast(column, &DataType::Utf8).context(RenderSnafu { column: name })?;
    let Some(strings) = utf8.as_any().downcast_ref::<StringArray>() else {
        return Ok(utf8);
    };
    if strings.null_count() == 0 {
        return Ok(utf8);
    }
    let filled: StringArray = strings.iter().map(|v| Some(v.unwrap_or(""))).collect();
    Ok(Arc::new(filled))
}

fn ensure_appendable(batch: &RecordBatch) -> Result<(), NormalizeError> {
    for field in batch.schema().fields() {
        if !ColumnKind::of(field.data_type()).is_appendable() {
            return Err(NormalizeError::Unresolved {
                column: field.name().clone(),
                data_type: field.data_type().to_string(),
            });
        }
    }
    Ok(())
}
