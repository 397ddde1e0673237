//! Audit columns attached to every appended table.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use deltalake::arrow::array::{ArrayRef, Int64Array, RecordBatch, StringArray};
use deltalake::arrow::datatypes::{DataType, Field, Schema};
use deltalake::arrow::error::ArrowError;
use tracing::debug;

use crate::config::ClusterKey;
use crate::schema::NormalizedTable;

pub const SOURCE_FILE_COLUMN: &str = "_source_file";
pub const CLUSTER_COLUMN: &str = "_cluster";
pub const INGESTED_AT_COLUMN: &str = "_ingested_at";
pub const FILE_SIZE_COLUMN: &str = "_file_size_bytes";
pub const ROW_COUNT_COLUMN: &str = "_row_count";

/// Audit column names, in the order they are appended.
pub const AUDIT_COLUMNS: [&str; 5] = [
    SOURCE_FILE_COLUMN,
    CLUSTER_COLUMN,
    INGESTED_AT_COLUMN,
    FILE_SIZE_COLUMN,
    ROW_COUNT_COLUMN,
];

/// Per-file values for the audit columns.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_file: String,
    pub cluster: ClusterKey,
    pub ingested_at: DateTime<Utc>,
    pub file_size_bytes: u64,
}

impl Provenance {
    /// Provenance for `path`, stamped now.
    pub fn for_file(path: &Path, cluster: ClusterKey, file_size_bytes: u64) -> Self {
        let source_file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            source_file,
            cluster,
            ingested_at: Utc::now(),
            file_size_bytes,
        }
    }
}

/// Append the audit columns to a normalized table.
///
/// Source columns that use a reserved name are replaced.
pub fn annotate(table: NormalizedTable, provenance: &Provenance) -> Result<RecordBatch, ArrowError> {
    let batch = table.into_batch();
    let num_rows = batch.num_rows();
    let schema = batch.schema();

    let mut fields: Vec<Field> = Vec::with_capacity(batch.num_columns() + AUDIT_COLUMNS.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.capacity());

    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        if AUDIT_COLUMNS.contains(&field.name().as_str()) {
            debug!(column = %field.name(), "Replacing source column with audit column");
            continue;
        }
        fields.push(field.as_ref().clone());
        columns.push(column.clone());
    }

    let ingested_at = provenance
        .ingested_at
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    let file_size = i64::try_from(provenance.file_size_bytes).unwrap_or(i64::MAX);
    let row_count = i64::try_from(num_rows).unwrap_or(i64::MAX);

    let text = |value: &str| -> ArrayRef { Arc::new(StringArray::from(vec![value; num_rows])) };
    let int = |value: i64| -> ArrayRef { Arc::new(Int64Array::from(vec![value; num_rows])) };

    let audit: [(&str, DataType, ArrayRef); 5] = [
        (SOURCE_FILE_COLUMN, DataType::Utf8, text(&provenance.source_file)),
        (CLUSTER_COLUMN, DataType::Utf8, text(provenance.cluster.id())),
        (INGESTED_AT_COLUMN, DataType::Utf8, text(&ingested_at)),
        (FILE_SIZE_COLUMN, DataType::Int64, int(file_size)),
        (ROW_COUNT_COLUMN, DataType::Int64, int(row_count)),
    ];
    for (name, data_type, column) in audit {
        fields.push(Field::new(name, data_type, true));
        columns.push(column);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::normalize;
    use crate::source::RawTable;
    use chrono::TimeZone;
    use deltalake::arrow::array::Array;

    fn provenance() -> Provenance {
        Provenance {
            source_file: "pacientes.csv".to_string(),
            cluster: ClusterKey::new("diabetes"),
            ingested_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            file_size_bytes: 2048,
        }
    }

    fn normalized(fields: Vec<(&str, ArrayRef)>) -> NormalizedTable {
        let schema = Schema::new(
            fields
                .iter()
                .map(|(name, a)| Field::new(*name, a.data_type().clone(), true))
                .collect::<Vec<_>>(),
        );
        let columns = fields.into_iter().map(|(_, a)| a).collect();
        let raw = RawTable::new(RecordBatch::try_new(Arc::new(schema), columns).unwrap(), 2048);
        normalize(&raw).unwrap()
    }

    fn text_at(batch: &RecordBatch, name: &str, row: usize) -> String {
        let idx = batch.schema().index_of(name).unwrap();
        batch
            .column(idx)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
            .value(row)
            .to_string()
    }

    fn int_at(batch: &RecordBatch, name: &str, row: usize) -> i64 {
        let idx = batch.schema().index_of(name).unwrap();
        batch
            .column(idx)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .value(row)
    }

    #[test]
    fn test_audit_columns_appended() {
        let table = normalized(vec![
            ("id", Arc::new(Int64Array::from(vec![1, 2, 3]))),
            ("nome", Arc::new(StringArray::from(vec!["a", "b", "c"]))),
        ]);

        let batch = annotate(table, &provenance()).unwrap();

        let names: Vec<_> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(
            names,
            vec!["id", "nome", "_source_file", "_cluster", "_ingested_at", "_file_size_bytes", "_row_count"]
        );
        assert!(batch.schema().fields().iter().all(|f| f.is_nullable()));
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(text_at(&batch, SOURCE_FILE_COLUMN, 2), "pacientes.csv");
        assert_eq!(text_at(&batch, CLUSTER_COLUMN, 0), "diabetes");
        assert_eq!(text_at(&batch, INGESTED_AT_COLUMN, 1), "2024-05-01T12:30:00.000Z");
        assert_eq!(int_at(&batch, FILE_SIZE_COLUMN, 0), 2048);
        assert_eq!(int_at(&batch, ROW_COUNT_COLUMN, 2), 3);
    }

    #[test]
    fn test_reserved_source_column_replaced() {
        let table = normalized(vec![
            ("_cluster", Arc::new(StringArray::from(vec!["spoofed"]))),
            ("valor", Arc::new(Int64Array::from(vec![10]))),
        ]);

        let batch = annotate(table, &provenance()).unwrap();

        assert_eq!(batch.num_columns(), 6);
        assert_eq!(batch.schema().field(0).name(), "valor");
        assert_eq!(text_at(&batch, CLUSTER_COLUMN, 0), "diabetes");
    }

    #[test]
    fn test_table_without_source_columns() {
        let table = normalized(vec![(
            "vazio",
            Arc::new(StringArray::from(vec![None::<&str>, None])),
        )]);

        let batch = annotate(table, &provenance()).unwrap();

        assert_eq!(batch.num_columns(), 5);
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.column(0).len(), 2);
        assert_eq!(int_at(&batch, ROW_COUNT_COLUMN, 1), 2);
    }

    #[test]
    fn test_provenance_uses_file_name() {
        let p = Provenance::for_file(Path::new("/landing/data/raw/diabetes/lote 1.xlsx"), ClusterKey::new("diabetes"), 10);
        assert_eq!(p.source_file, "lote 1.xlsx");
    }
}
