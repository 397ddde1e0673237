//! Bronze table statistics.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use deltalake::DeltaTable;
use deltalake::parquet::file::reader::{FileReader, SerializedFileReader};
use serde::Serialize;
use snafu::prelude::*;
use tracing::warn;
use url::Url;

use crate::config::ClusterKey;
use crate::error::{DeltaError, ParquetFooterSnafu, TableFilesSnafu};

use super::delta::{open_table, table_arrow_schema, table_exists};

/// Summary of one bronze table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    /// Rows across all committed data files.
    pub rows: u64,
    /// Columns in the table schema, audit columns included.
    pub columns: usize,
    /// Newest modification time among the table's files.
    pub last_modified: Option<DateTime<Utc>>,
    /// Bytes on disk, transaction log included.
    pub size_bytes: u64,
    /// Current table version.
    pub version: i64,
}

/// Stats for every `*_bronze` table under `bronze_root`, keyed by cluster.
///
/// Tables that cannot be read are logged and left out.
pub async fn bronze_stats(bronze_root: &Path) -> Result<BTreeMap<String, TableStats>, DeltaError> {
    let mut report = BTreeMap::new();
    if !bronze_root.is_dir() {
        return Ok(report);
    }

    let entries = std::fs::read_dir(bronze_root).context(TableFilesSnafu { path: bronze_root })?;
    for entry in entries {
        let entry = entry.context(TableFilesSnafu { path: bronze_root })?;
        let dir = entry.path();
        let Some(cluster) = ClusterKey::from_table_dir(&dir) else {
            continue;
        };
        if !dir.is_dir() || !table_exists(&dir) {
            continue;
        }

        match table_stats(&dir).await {
            Ok(stats) => {
                report.insert(cluster.id().to_string(), stats);
            }
            Err(e) => warn!(table = %dir.display(), error = %e, "Skipping unreadable bronze table"),
        }
    }

    Ok(report)
}

/// Stats for the table at `dir`.
pub async fn table_stats(dir: &Path) -> Result<TableStats, DeltaError> {
    let table = open_table(dir).await?;
    let columns = table_arrow_schema(&table)?.fields().len();
    let rows = committed_rows(&table)?;
    let (size_bytes, newest) = dir_usage(dir)?;

    Ok(TableStats {
        rows,
        columns,
        last_modified: newest.map(DateTime::<Utc>::from),
        size_bytes,
        version: table.version().unwrap_or(-1),
    })
}

/// Sum of row counts from the Parquet footers of the active files.
fn committed_rows(table: &DeltaTable) -> Result<u64, DeltaError> {
    let uris: Vec<String> = table
        .get_file_uris()
        .map_err(|source| DeltaError::DeltaOperation { source })?
        .collect();

    let mut rows = 0u64;
    for uri in uris {
        let path = uri_to_path(&uri);
        let file = File::open(&path).context(TableFilesSnafu { path: &path })?;
        let reader = SerializedFileReader::new(file).context(ParquetFooterSnafu { path: &path })?;
        rows += u64::try_from(reader.metadata().file_metadata().num_rows()).unwrap_or(0);
    }
    Ok(rows)
}

fn uri_to_path(uri: &str) -> PathBuf {
    Url::parse(uri)
        .ok()
        .filter(|url| url.scheme() == "file")
        .and_then(|url| url.to_file_path().ok())
        .unwrap_or_else(|| PathBuf::from(uri))
}

/// Recursive byte size and newest mtime of everything under `dir`.
fn dir_usage(dir: &Path) -> Result<(u64, Option<SystemTime>), DeltaError> {
    let mut size = 0u64;
    let mut newest: Option<SystemTime> = None;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current).context(TableFilesSnafu { path: &current })?;
        for entry in entries {
            let entry = entry.context(TableFilesSnafu { path: &current })?;
            let path = entry.path();
            let metadata = entry.metadata().context(TableFilesSnafu { path: &path })?;
            if metadata.is_dir() {
                pending.push(path);
                continue;
            }
            size += metadata.len();
            if let Ok(modified) = metadata.modified() {
                newest = Some(newest.map_or(modified, |n| n.max(modified)));
            }
        }
    }

    Ok((size, newest))
}
