//! Schema evolution for appends to bronze tables.
//!
//! A bronze table's schema only grows: new nullable columns are added and
//! existing columns keep their type. An incoming column may be narrower than
//! the table's (e.g. Int32 into Int64) and is widened on append; any other
//! type difference is a conflict.

use std::collections::HashMap;
use std::sync::Arc;

use deltalake::arrow::array::{ArrayRef, RecordBatch, new_null_array};
use deltalake::arrow::compute::cast;
use deltalake::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use deltalake::arrow::error::ArrowError;

use crate::error::DeltaError;

/// Result of comparing a table schema with an incoming schema.
#[derive(Debug, Clone)]
pub struct SchemaComparison {
    /// Fields present in incoming schema but not in table schema.
    pub new_fields: Vec<Field>,
    /// Fields present in table schema but not in incoming schema.
    pub missing_fields: Vec<Field>,
    /// Type changes: (field_name, table_type, incoming_type).
    pub type_changes: Vec<(String, DataType, DataType)>,
}

impl SchemaComparison {
    /// Check if the schemas are identical.
    pub fn is_identical(&self) -> bool {
        self.new_fields.is_empty() && self.missing_fields.is_empty() && self.type_changes.is_empty()
    }

    /// Whether the incoming data can be appended, possibly adding columns.
    pub fn is_compatible(&self) -> bool {
        self.type_changes.is_empty()
    }

    /// The first type conflict as a write error.
    pub fn conflict(&self) -> Option<DeltaError> {
        self.type_changes
            .first()
            .map(|(column, table_type, incoming_type)| DeltaError::SchemaConflict {
                column: column.clone(),
                table_type: table_type.to_string(),
                incoming_type: incoming_type.to_string(),
            })
    }
}

/// Compare a table schema against an incoming schema.
///
/// A same-name column whose incoming type differs from the table type is a
/// type change unless the incoming type widens losslessly into the table type.
pub fn compare_schemas(table: &Schema, incoming: &Schema) -> SchemaComparison {
    let table_fields: HashMap<&str, &Field> = table
        .fields()
        .iter()
        .map(|f| (f.name().as_str(), f.as_ref()))
        .collect();

    let incoming_names: HashMap<&str, ()> = incoming
        .fields()
        .iter()
        .map(|f| (f.name().as_str(), ()))
        .collect();

    let mut new_fields = Vec::new();
    let mut type_changes = Vec::new();

    for field in incoming.fields() {
        match table_fields.get(field.name().as_str()) {
            Some(table_field) => {
                if table_field.data_type() != field.data_type()
                    && !is_type_widening(field.data_type(), table_field.data_type())
                {
                    type_changes.push((
                        field.name().clone(),
                        table_field.data_type().clone(),
                        field.data_type().clone(),
                    ));
                }
            }
            None => new_fields.push(field.as_ref().clone()),
        }
    }

    let missing_fields = table
        .fields()
        .iter()
        .filter(|f| !incoming_names.contains_key(f.name().as_str()))
        .map(|f| f.as_ref().clone())
        .collect();

    SchemaComparison {
        new_fields,
        missing_fields,
        type_changes,
    }
}

/// Check if `from` can be cast to `to` without loss.
///
/// Allowed widenings:
/// - Integer widening: Int8 -> Int16 -> Int32 -> Int64
/// - Float widening: Float32 -> Float64
/// - Date widening: Date32 -> Date64
/// - Timestamp precision coercion to Microsecond, timezone unchanged
pub fn is_type_widening(from: &DataType, to: &DataType) -> bool {
    if let (DataType::Timestamp(from_unit, from_tz), DataType::Timestamp(to_unit, to_tz)) =
        (from, to)
    {
        return from_tz == to_tz
            && matches!(
                (from_unit, to_unit),
                (TimeUnit::Nanosecond, TimeUnit::Microsecond)
                    | (TimeUnit::Millisecond, TimeUnit::Microsecond)
            );
    }

    matches!(
        (from, to),
        (DataType::Int8, DataType::Int16 | DataType::Int32 | DataType::Int64)
            | (DataType::Int16, DataType::Int32 | DataType::Int64)
            | (DataType::Int32, DataType::Int64)
            | (DataType::Float32, DataType::Float64)
            | (DataType::Date32, DataType::Date64)
    )
}

/// Merge a table schema with an incoming schema.
///
/// Returns the table's fields in order followed by the incoming schema's new
/// fields, all new fields nullable.
pub fn merge_schemas(table: &Schema, incoming: &Schema) -> Result<SchemaRef, DeltaError> {
    let comparison = compare_schemas(table, incoming);
    if let Some(conflict) = comparison.conflict() {
        return Err(conflict);
    }

    let mut merged: Vec<Arc<Field>> = table.fields().iter().cloned().collect();
    merged.extend(
        comparison
            .new_fields
            .into_iter()
            .map(|f| Arc::new(f.with_nullable(true))),
    );

    Ok(Arc::new(Schema::new(merged)))
}

/// Reshape `batch` to `target`: columns reordered, absent columns null-filled,
/// narrower columns widened.
pub fn align_batch(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch, ArrowError> {
    let num_rows = batch.num_rows();
    let source = batch.schema();

    let columns: Vec<ArrayRef> = target
        .fields()
        .iter()
        .map(|field| match source.index_of(field.name()) {
            Ok(idx) => {
                let column = batch.column(idx);
                if column.data_type() == field.data_type() {
                    Ok(column.clone())
                } else {
                    cast(column, field.data_type())
                }
            }
            Err(_) => Ok(new_null_array(field.data_type(), num_rows)),
        })
        .collect::<Result<_, _>>()?;

    RecordBatch::try_new(target.clone(), columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltalake::arrow::array::{Array, Int32Array, Int64Array, StringArray};

    fn make_schema(fields: Vec<(&str, DataType, bool)>) -> Schema {
        Schema::new(
            fields
                .into_iter()
                .map(|(name, dtype, nullable)| Field::new(name, dtype, nullable))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_compare_identical_schemas() {
        let schema = make_schema(vec![
            ("id", DataType::Int64, true),
            ("name", DataType::Utf8, true),
        ]);

        let comparison = compare_schemas(&schema, &schema);

        assert!(comparison.is_identical());
        assert!(comparison.is_compatible());
    }

    #[test]
    fn test_compare_new_and_missing_fields() {
        let table = make_schema(vec![("x", DataType::Int64, true), ("y", DataType::Utf8, true)]);
        let incoming = make_schema(vec![("y", DataType::Utf8, true), ("z", DataType::Float64, true)]);

        let comparison = compare_schemas(&table, &incoming);

        assert!(comparison.is_compatible());
        assert_eq!(comparison.new_fields.len(), 1);
        assert_eq!(comparison.new_fields[0].name(), "z");
        assert_eq!(comparison.missing_fields.len(), 1);
        assert_eq!(comparison.missing_fields[0].name(), "x");
    }

    #[test]
    fn test_narrower_incoming_integer_is_compatible() {
        let table = make_schema(vec![("n", DataType::Int64, true)]);
        let incoming = make_schema(vec![("n", DataType::Int32, true)]);

        assert!(compare_schemas(&table, &incoming).is_compatible());
    }

    #[test]
    fn test_wider_incoming_integer_conflicts() {
        let table = make_schema(vec![("n", DataType::Int32, true)]);
        let incoming = make_schema(vec![("n", DataType::Int64, true)]);

        assert!(!compare_schemas(&table, &incoming).is_compatible());
    }

    #[test]
    fn test_integer_to_float_conflicts() {
        let table = make_schema(vec![("peso", DataType::Int64, true)]);
        let incoming = make_schema(vec![("peso", DataType::Float64, true)]);

        let conflict = compare_schemas(&table, &incoming).conflict().unwrap();
        match conflict {
            DeltaError::SchemaConflict {
                column,
                table_type,
                incoming_type,
            } => {
                assert_eq!(column, "peso");
                assert_eq!(table_type, "Int64");
                assert_eq!(incoming_type, "Float64");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_timestamp_precision_coercion() {
        let table = make_schema(vec![(
            "ts",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            true,
        )]);
        let nanos = make_schema(vec![(
            "ts",
            DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
            true,
        )]);
        let naive = make_schema(vec![("ts", DataType::Timestamp(TimeUnit::Nanosecond, None), true)]);

        assert!(compare_schemas(&table, &nanos).is_compatible());
        assert!(!compare_schemas(&table, &naive).is_compatible());
    }

    #[test]
    fn test_merge_schemas_appends_new_fields_nullable() {
        let table = make_schema(vec![("x", DataType::Int64, true), ("y", DataType::Utf8, true)]);
        let incoming = make_schema(vec![("y", DataType::Utf8, true), ("z", DataType::Utf8, false)]);

        let merged = merge_schemas(&table, &incoming).unwrap();

        let names: Vec<_> = merged.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
        assert!(merged.field(2).is_nullable());
    }

    #[test]
    fn test_merge_schemas_rejects_type_change() {
        let table = make_schema(vec![("x", DataType::Int64, true)]);
        let incoming = make_schema(vec![("x", DataType::Utf8, true)]);

        assert!(matches!(
            merge_schemas(&table, &incoming),
            Err(DeltaError::SchemaConflict { .. })
        ));
    }

    #[test]
    fn test_align_batch_fills_reorders_and_widens() {
        let incoming = Arc::new(make_schema(vec![
            ("z", DataType::Utf8, true),
            ("n", DataType::Int32, true),
        ]));
        let batch = RecordBatch::try_new(
            incoming,
            vec![
                Arc::new(StringArray::from(vec!["a", "b"])),
                Arc::new(Int32Array::from(vec![1, 2])),
            ],
        )
        .unwrap();
        let target = Arc::new(make_schema(vec![
            ("n", DataType::Int64, true),
            ("x", DataType::Utf8, true),
            ("z", DataType::Utf8, true),
        ]));

        let aligned = align_batch(&batch, &target).unwrap();

        assert_eq!(aligned.schema(), target);
        let n = aligned.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(n.value(1), 2);
        assert_eq!(aligned.column(1).null_count(), 2);
        let z = aligned.column(2).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(z.value(0), "a");
    }
}
