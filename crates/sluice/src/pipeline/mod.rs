//! Per-file ingestion: read, normalize, annotate, append.
//!
//! Failures are contained to the file that raised them. `process` logs and
//! records metrics for every outcome; `ingest` is the bare pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use snafu::prelude::*;
use tracing::{error, info, warn};

use crate::annotate::{Provenance, annotate};
use crate::config::{ClusterKey, Config};
use crate::error::{AnnotateSnafu, IngestError, ReadTaskSnafu, UnsupportedFormatSnafu};
use crate::metrics::events::{FileFailed, FileProcessed, FileStatus};
use crate::schema::normalize;
use crate::sink::{BronzeWriter, DeltaStore, TableStore};
use crate::source::{SourceFormat, SourceReaders};
use sluice_core::emit;

/// A file accepted for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFile {
    pub path: PathBuf,
    pub cluster: ClusterKey,
    /// Lowercase extension without the dot.
    pub extension: String,
}

impl IncomingFile {
    pub fn new(path: impl Into<PathBuf>, cluster: ClusterKey) -> Self {
        let path = path.into();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Self {
            path,
            cluster,
            extension,
        }
    }

    /// File name for logs.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Result of ingesting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The file was appended at `version`.
    Written {
        version: i64,
        rows: usize,
        columns: usize,
    },
    /// The file had no data rows; nothing was written.
    Empty,
}

/// The ingestion pipeline shared by the scan, the watcher and the CLI.
pub struct IngestPipeline<S: TableStore = DeltaStore> {
    readers: Arc<SourceReaders>,
    writer: BronzeWriter<S>,
}

impl IngestPipeline<DeltaStore> {
    /// Pipeline writing Delta tables under the configured bronze root.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            SourceReaders::new(config.infer_sample_rows),
            BronzeWriter::new(DeltaStore::new(&config.bronze_root)),
        )
    }
}

impl<S: TableStore> IngestPipeline<S> {
    pub fn new(readers: SourceReaders, writer: BronzeWriter<S>) -> Self {
        Self {
            readers: Arc::new(readers),
            writer,
        }
    }

    pub fn writer(&self) -> &BronzeWriter<S> {
        &self.writer
    }

    /// Run one file through the pipeline.
    pub async fn ingest(&self, file: &IncomingFile) -> Result<FileOutcome, IngestError> {
        let format = SourceFormat::from_extension(&file.extension).context(UnsupportedFormatSnafu {
            extension: file.extension.clone(),
        })?;

        let readers = Arc::clone(&self.readers);
        let path = file.path.clone();
        let raw = tokio::task::spawn_blocking(move || readers.read(&path, format))
            .await
            .context(ReadTaskSnafu)??;

        if raw.is_empty() {
            return Ok(FileOutcome::Empty);
        }

        let normalized = normalize(&raw)?;
        if normalized.is_all_text() {
            warn!(file = %file.name(), cluster = %file.cluster, "Stored every column as text");
        }

        let provenance = Provenance::for_file(&file.path, file.cluster.clone(), raw.file_size_bytes());
        let batch = annotate(normalized, &provenance).context(AnnotateSnafu)?;
        let rows = batch.num_rows();
        let columns = batch.num_columns();

        let version = self.writer.write(&file.cluster, batch).await?;
        Ok(FileOutcome::Written {
            version,
            rows,
            columns,
        })
    }

    /// Ingest a file, logging the outcome and recording metrics.
    pub async fn process(&self, file: &IncomingFile) -> Result<FileOutcome, IngestError> {
        let cluster = file.cluster.to_string();
        let result = self.ingest(file).await;

        match &result {
            Ok(FileOutcome::Written {
                version,
                rows,
                columns,
            }) => {
                info!(
                    file = %file.name(),
                    cluster = %file.cluster,
                    rows,
                    columns,
                    version,
                    "Ingested file"
                );
                emit!(FileProcessed {
                    status: FileStatus::Success,
                    cluster,
                });
            }
            Ok(FileOutcome::Empty) => {
                warn!(file = %file.name(), cluster = %file.cluster, "File has no data rows, skipping");
                emit!(FileProcessed {
                    status: FileStatus::Skipped,
                    cluster,
                });
            }
            Err(IngestError::UnsupportedFormat { extension }) => {
                info!(file = %file.name(), cluster = %file.cluster, extension = %extension, "Unsupported format, skipping");
                emit!(FileProcessed {
                    status: FileStatus::Skipped,
                    cluster,
                });
            }
            Err(e) => {
                error!(file = %file.name(), cluster = %file.cluster, stage = e.stage().as_str(), error = %e, "Failed to ingest file");
                emit!(FileFailed {
                    stage: e.stage(),
                    cluster: cluster.clone(),
                });
                emit!(FileProcessed {
                    status: FileStatus::Failed,
                    cluster,
                });
            }
        }

        result
    }
}

/// Whether `path` is a regular file.
pub(crate) fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
