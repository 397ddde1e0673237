//! Error types for the sluice ingestion service.

use std::path::PathBuf;

use deltalake::arrow::error::ArrowError;
use snafu::prelude::*;

pub use sluice_core::error::{ConfigError, MetricsError};

use crate::metrics::events::FailureStage;

/// Errors that can occur while decoding a source file into a table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReadError {
    /// Failed to read the file from disk.
    #[snafu(display("Failed to read {}: {source}", path.display()))]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The delimited-text tokenizer failed.
    #[snafu(display("Failed to parse delimited text in {}: {source}", path.display()))]
    Csv { path: PathBuf, source: csv::Error },

    /// Neither spreadsheet decoder could open the workbook.
    #[snafu(display("Failed to open workbook {}: {source}", path.display()))]
    Workbook {
        path: PathBuf,
        source: calamine::Error,
    },

    /// The workbook has no worksheet.
    #[snafu(display("Workbook {} has no worksheet", path.display()))]
    NoWorksheet { path: PathBuf },

    /// The first worksheet could not be decoded.
    #[snafu(display("Failed to read first worksheet of {}: {source}", path.display()))]
    Worksheet {
        path: PathBuf,
        source: calamine::Error,
    },

    /// Failed to assemble the decoded columns into a batch.
    #[snafu(display("Failed to build record batch for {}: {source}", path.display()))]
    BuildBatch { path: PathBuf, source: ArrowError },
}

/// Errors that can occur while normalizing column types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NormalizeError {
    /// Failed to render a column's values as text.
    #[snafu(display("Failed to render column '{column}' as text: {source}"))]
    Render { column: String, source: ArrowError },

    /// Failed to rebuild the normalized batch.
    #[snafu(display("Failed to rebuild normalized batch: {source}"))]
    Rebuild { source: ArrowError },

    /// A column still has a type that cannot be appended.
    #[snafu(display("Column '{column}' still has unsupported type {data_type}"))]
    Unresolved { column: String, data_type: String },
}

/// Errors that can occur during Delta Lake operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DeltaError {
    /// Failed to build a table URL from a directory.
    #[snafu(display("Failed to parse Delta table URL: {}", path.display()))]
    UrlParse { path: PathBuf },

    /// Delta Lake operation failed.
    #[snafu(display("Delta Lake operation failed: {source}"))]
    DeltaOperation { source: deltalake::DeltaTableError },

    /// Failed to convert between Delta and Arrow schemas.
    #[snafu(display("Failed to convert schema: {source}"))]
    SchemaConversion { source: ArrowError },

    /// Failed to construct a Delta StructType.
    #[snafu(display("Failed to construct Delta schema: {message}"))]
    StructType { message: String },

    /// Incoming columns are not in the table and schema merging is off.
    #[snafu(display("Columns not present in table: {}", columns.join(", ")))]
    UnexpectedColumns { columns: Vec<String> },

    /// Incoming column type is incompatible with the table's column type.
    #[snafu(display(
        "Schema conflict on column '{column}': table has {table_type}, incoming has {incoming_type}"
    ))]
    SchemaConflict {
        column: String,
        table_type: String,
        incoming_type: String,
    },

    /// Failed to align a batch to the table schema.
    #[snafu(display("Failed to align batch to table schema: {source}"))]
    BatchAlign { source: ArrowError },

    /// Failed to create the table directory.
    #[snafu(display("Failed to create table directory {}: {source}", path.display()))]
    CreateTableDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to remove a table that never received data.
    #[snafu(display("Failed to remove empty table {}: {source}", path.display()))]
    RemoveEmptyTable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to inspect table files on disk.
    #[snafu(display("Failed to inspect {}: {source}", path.display()))]
    TableFiles {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read a Parquet footer.
    #[snafu(display("Failed to read Parquet footer of {}: {source}", path.display()))]
    ParquetFooter {
        path: PathBuf,
        source: deltalake::parquet::errors::ParquetError,
    },
}

/// Per-file ingestion failure.
///
/// Each variant is contained to the file that raised it.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    /// The file's extension has no decoder.
    #[snafu(display("Unsupported file format: '{extension}'"))]
    UnsupportedFormat { extension: String },

    /// The file could not be decoded.
    #[snafu(display("Read failure: {source}"))]
    Read { source: ReadError },

    /// The decoded table could not be normalized.
    #[snafu(display("Normalization failure: {source}"))]
    Normalize { source: NormalizeError },

    /// Audit columns could not be attached.
    #[snafu(display("Failed to annotate table: {source}"))]
    Annotate { source: ArrowError },

    /// The bronze table rejected the append.
    #[snafu(display("Write failure: {source}"))]
    Write { source: DeltaError },

    /// The blocking read task panicked or was cancelled.
    #[snafu(display("Read task failed: {source}"))]
    ReadTask { source: tokio::task::JoinError },
}

impl IngestError {
    /// Pipeline stage the failure belongs to, for metrics.
    pub fn stage(&self) -> FailureStage {
        match self {
            IngestError::UnsupportedFormat { .. }
            | IngestError::Read { .. }
            | IngestError::ReadTask { .. } => FailureStage::Read,
            IngestError::Normalize { .. } | IngestError::Annotate { .. } => {
                FailureStage::Normalize
            }
            IngestError::Write { .. } => FailureStage::Write,
        }
    }
}

impl From<ReadError> for IngestError {
    fn from(source: ReadError) -> Self {
        IngestError::Read { source }
    }
}

impl From<NormalizeError> for IngestError {
    fn from(source: NormalizeError) -> Self {
        IngestError::Normalize { source }
    }
}

impl From<DeltaError> for IngestError {
    fn from(source: DeltaError) -> Self {
        IngestError::Write { source }
    }
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },

    /// Delta error.
    #[snafu(display("Delta error: {source}"))]
    Delta { source: DeltaError },

    /// A single-file ingestion failed.
    #[snafu(display("Ingestion of {} failed: {source}", path.display()))]
    Ingest { path: PathBuf, source: IngestError },

    /// Failed to prepare a cluster directory.
    #[snafu(display("Failed to create cluster directory {}: {source}", path.display()))]
    ClusterDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize the stats report.
    #[snafu(display("Failed to encode stats report: {source}"))]
    StatsEncode { source: serde_json::Error },

    /// Task join error.
    #[snafu(display("Task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<MetricsError> for PipelineError {
    fn from(source: MetricsError) -> Self {
        PipelineError::Metrics { source }
    }
}

impl From<DeltaError> for PipelineError {
    fn from(source: DeltaError) -> Self {
        PipelineError::Delta { source }
    }
}
