//! Decoded table model shared by every reader.

use std::sync::Arc;

use deltalake::arrow::array::RecordBatch;
use deltalake::arrow::datatypes::{DataType, Schema};

/// Coarse type of a decoded column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Dates, times, timestamps, durations and intervals.
    Temporal,
    /// Every value is null and the column has no type.
    Null,
    /// Lists, structs, maps, unions and dictionaries of those.
    Nested,
    /// Any type a bronze table cannot hold as-is (unsigned, half-float, binary, ...).
    Indeterminate,
}

impl ColumnKind {
    /// Classify an Arrow data type.
    pub fn of(data_type: &DataType) -> Self {
        match data_type {
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => ColumnKind::String,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                ColumnKind::Integer
            }
            DataType::Float32
            | DataType::Float64
            | DataType::Decimal128(_, _)
            | DataType::Decimal256(_, _) => ColumnKind::Float,
            DataType::Boolean => ColumnKind::Boolean,
            DataType::Date32
            | DataType::Date64
            | DataType::Timestamp(_, _)
            | DataType::Time32(_)
            | DataType::Time64(_)
            | DataType::Duration(_)
            | DataType::Interval(_) => ColumnKind::Temporal,
            DataType::Null => ColumnKind::Null,
            DataType::List(_)
            | DataType::LargeList(_)
            | DataType::FixedSizeList(_, _)
            | DataType::ListView(_)
            | DataType::LargeListView(_)
            | DataType::Struct(_)
            | DataType::Map(_, _)
            | DataType::Union(_, _) => ColumnKind::Nested,
            DataType::Dictionary(_, value) if ColumnKind::of(value) == ColumnKind::Nested => {
                ColumnKind::Nested
            }
            _ => ColumnKind::Indeterminate,
        }
    }

    /// Whether a column of this kind can be appended without conversion.
    pub fn is_appendable(&self) -> bool {
        !matches!(
            self,
            ColumnKind::Null | ColumnKind::Nested | ColumnKind::Indeterminate
        )
    }
}

/// A decoded source file: ordered named columns plus their kinds.
///
/// Immutable once produced. Carries the byte size the file had when it was
/// read so audit columns describe exactly what was decoded.
#[derive(Debug, Clone)]
pub struct RawTable {
    batch: RecordBatch,
    kinds: Vec<ColumnKind>,
    file_size_bytes: u64,
}

impl RawTable {
    pub fn new(batch: RecordBatch, file_size_bytes: u64) -> Self {
        let kinds = batch
            .schema()
            .fields()
            .iter()
            .map(|f| ColumnKind::of(f.data_type()))
            .collect();
        Self {
            batch,
            kinds,
            file_size_bytes,
        }
    }

    /// A table with no columns and no rows.
    pub fn empty(file_size_bytes: u64) -> Self {
        Self::new(
            RecordBatch::new_empty(Arc::new(Schema::empty())),
            file_size_bytes,
        )
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn kinds(&self) -> &[ColumnKind] {
        &self.kinds
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    /// True when there are no data rows.
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn file_size_bytes(&self) -> u64 {
        self.file_size_bytes
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }
}
