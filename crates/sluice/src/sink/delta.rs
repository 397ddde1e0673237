//! Delta Lake table store.
//!
//! Each cluster owns one table at `<bronze_root>/<cluster>_bronze`. Tables are
//! created on first write with the first batch's schema, then only appended
//! to, merging new columns in as they appear. A table left at version 0 by a
//! failed first append holds no data and is recreated by the next write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use deltalake::DeltaTable;
use deltalake::arrow::array::RecordBatch;
use deltalake::arrow::datatypes::{Schema, SchemaRef};
use deltalake::operations::create::CreateBuilder;
use deltalake::writer::{DeltaWriter, RecordBatchWriter, WriteMode};
use snafu::prelude::*;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClusterKey;
use crate::error::{
    BatchAlignSnafu, CreateTableDirSnafu, DeltaError, RemoveEmptyTableSnafu,
    UnexpectedColumnsSnafu,
};
use crate::schema::{align_batch, compare_schemas, merge_schemas};

use super::traits::TableStore;

/// Delta Lake store rooted at the bronze directory.
#[derive(Debug, Clone)]
pub struct DeltaStore {
    bronze_root: PathBuf,
}

impl DeltaStore {
    pub fn new(bronze_root: impl Into<PathBuf>) -> Self {
        Self {
            bronze_root: bronze_root.into(),
        }
    }

    pub fn bronze_root(&self) -> &Path {
        &self.bronze_root
    }

    /// Directory of the cluster's table.
    pub fn table_dir(&self, cluster: &ClusterKey) -> PathBuf {
        self.bronze_root.join(cluster.table_name())
    }
}

#[async_trait]
impl TableStore for DeltaStore {
    type Table = DeltaTable;

    async fn create_or_open(
        &self,
        cluster: &ClusterKey,
        schema: &Schema,
    ) -> Result<DeltaTable, DeltaError> {
        let dir = self.table_dir(cluster);
        if table_exists(&dir) {
            let table = open_table(&dir).await?;
            if table.version() != Some(0) {
                return Ok(table);
            }
            warn!(
                table = %dir.display(),
                "Table has no committed data, recreating with incoming schema"
            );
            tokio::fs::remove_dir_all(&dir)
                .await
                .context(RemoveEmptyTableSnafu { path: &dir })?;
        }
        create_table(&dir, schema).await
    }

    async fn append(
        &self,
        table: &mut DeltaTable,
        batch: RecordBatch,
        merge_schema: bool,
    ) -> Result<i64, DeltaError> {
        table
            .load()
            .await
            .map_err(|source| DeltaError::DeltaOperation { source })?;

        let table_schema = table_arrow_schema(table)?;
        let incoming = batch.schema();

        let comparison = compare_schemas(&table_schema, &incoming);
        if let Some(conflict) = comparison.conflict() {
            return Err(conflict);
        }
        if !comparison.new_fields.is_empty() {
            ensure!(
                merge_schema,
                UnexpectedColumnsSnafu {
                    columns: comparison
                        .new_fields
                        .iter()
                        .map(|f| f.name().clone())
                        .collect::<Vec<_>>(),
                }
            );
            info!(
                new_columns = comparison.new_fields.len(),
                "Merging new columns into table schema"
            );
        }

        let target = merge_schemas(&table_schema, &incoming)?;
        let aligned = align_batch(&batch, &target).context(BatchAlignSnafu)?;

        let mut writer = RecordBatchWriter::for_table(table)
            .map_err(|source| DeltaError::DeltaOperation { source })?;
        writer
            .write_with_mode(aligned, WriteMode::MergeSchema)
            .await
            .map_err(|source| DeltaError::DeltaOperation { source })?;
        let version = writer
            .flush_and_commit(table)
            .await
            .map_err(|source| DeltaError::DeltaOperation { source })?;

        debug!(version, rows = batch.num_rows(), "Committed batch");
        Ok(version)
    }
}

/// A directory holds a Delta table once it has a transaction log.
pub fn table_exists(dir: &Path) -> bool {
    dir.join("_delta_log").is_dir()
}

/// Arrow schema of the table's current snapshot.
pub fn table_arrow_schema(table: &DeltaTable) -> Result<SchemaRef, DeltaError> {
    use deltalake::kernel::engine::arrow_conversion::TryIntoArrow;

    let snapshot = table
        .snapshot()
        .map_err(|source| DeltaError::DeltaOperation { source })?;
    let arrow_schema: Schema = snapshot
        .schema()
        .as_ref()
        .try_into_arrow()
        .map_err(|source| DeltaError::SchemaConversion { source })?;
    Ok(Arc::new(arrow_schema))
}

/// Build the `file://` URL of a local table directory.
pub fn table_url(dir: &Path) -> Result<Url, DeltaError> {
    let absolute = std::path::absolute(dir).map_err(|_| DeltaError::UrlParse {
        path: dir.to_path_buf(),
    })?;
    Url::from_directory_path(&absolute).map_err(|_| DeltaError::UrlParse {
        path: dir.to_path_buf(),
    })
}

/// Open an existing table at `dir`.
pub async fn open_table(dir: &Path) -> Result<DeltaTable, DeltaError> {
    let url = table_url(dir)?;
    let table = deltalake::open_table_with_storage_options(url, HashMap::new())
        .await
        .map_err(|source| DeltaError::DeltaOperation { source })?;

    info!(
        table = %dir.display(),
        version = table.version().unwrap_or(-1),
        "Opened existing Delta table"
    );
    Ok(table)
}

async fn create_table(dir: &Path, schema: &Schema) -> Result<DeltaTable, DeltaError> {
    std::fs::create_dir_all(dir).context(CreateTableDirSnafu { path: dir })?;
    let url = table_url(dir)?;

    info!(table = %dir.display(), columns = schema.fields().len(), "Creating new Delta table");

    let delta_schema = arrow_schema_to_delta(schema)?;
    CreateBuilder::new()
        .with_location(url.as_str())
        .with_columns(delta_schema.fields().cloned())
        .await
        .map_err(|source| DeltaError::DeltaOperation { source })
}

/// Convert an Arrow schema to a Delta schema.
fn arrow_schema_to_delta(schema: &Schema) -> Result<deltalake::kernel::StructType, DeltaError> {
    use deltalake::kernel::engine::arrow_conversion::TryIntoKernel;
    use deltalake::kernel::{DataType as DeltaType, StructField, StructType};

    let fields: Vec<StructField> = schema
        .fields()
        .iter()
        .map(|field| {
            let delta_type: DeltaType = field
                .data_type()
                .try_into_kernel()
                .map_err(|source| DeltaError::SchemaConversion { source })?;
            Ok(StructField::new(field.name(), delta_type, field.is_nullable()))
        })
        .collect::<Result<Vec<_>, DeltaError>>()?;

    StructType::try_new(fields).map_err(|e| DeltaError::StructType {
        message: e.to_string(),
    })
}
