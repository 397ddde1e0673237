//! Internal events for metrics emission.
//!
//! Every event carries a `cluster` label so per-cluster ingestion can be
//! observed separately.

use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

pub use sluice_core::metrics::events::InternalEvent;

/// How a file came to the pipeline's attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOrigin {
    /// Found by the startup scan.
    Scan,
    /// Announced by the live directory observer.
    Watch,
    /// Named explicitly on the command line.
    Manual,
}

impl DiscoveryOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryOrigin::Scan => "scan",
            DiscoveryOrigin::Watch => "watch",
            DiscoveryOrigin::Manual => "manual",
        }
    }
}

/// Event emitted when a supported file is accepted for processing.
pub struct FileDiscovered {
    pub origin: DiscoveryOrigin,
    pub cluster: String,
}

impl InternalEvent for FileDiscovered {
    fn emit(self) {
        trace!(origin = self.origin.as_str(), cluster = %self.cluster, "File discovered");
        counter!(
            "sluice_files_discovered_total",
            "origin" => self.origin.as_str(),
            "cluster" => self.cluster
        )
        .increment(1);
    }
}

/// Event emitted when a create event is dropped because the path is in flight.
pub struct DuplicateEventDropped {
    pub cluster: String,
}

impl InternalEvent for DuplicateEventDropped {
    fn emit(self) {
        trace!(cluster = %self.cluster, "Duplicate event dropped");
        counter!("sluice_duplicate_events_total", "cluster" => self.cluster).increment(1);
    }
}

/// Final status of a processed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Success,
    Skipped,
    Failed,
}

impl FileStatus {
    fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Success => "success",
            FileStatus::Skipped => "skipped",
            FileStatus::Failed => "failed",
        }
    }
}

/// Event emitted once per file when processing finishes.
pub struct FileProcessed {
    pub status: FileStatus,
    pub cluster: String,
}

impl InternalEvent for FileProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), cluster = %self.cluster, "File processed");
        counter!(
            "sluice_files_processed_total",
            "status" => self.status.as_str(),
            "cluster" => self.cluster
        )
        .increment(1);
    }
}

/// Stage at which a file failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Read,
    Normalize,
    Write,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Read => "read",
            FailureStage::Normalize => "normalize",
            FailureStage::Write => "write",
        }
    }
}

/// Event emitted when a file fails processing.
pub struct FileFailed {
    pub stage: FailureStage,
    pub cluster: String,
}

impl InternalEvent for FileFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), cluster = %self.cluster, "File failed");
        counter!(
            "sluice_files_failed_total",
            "stage" => self.stage.as_str(),
            "cluster" => self.cluster
        )
        .increment(1);
    }
}

/// Event emitted after rows are committed to a bronze table.
pub struct RowsWritten {
    pub rows: u64,
    pub cluster: String,
}

impl InternalEvent for RowsWritten {
    fn emit(self) {
        trace!(rows = self.rows, cluster = %self.cluster, "Rows written");
        counter!("sluice_rows_written_total", "cluster" => self.cluster).increment(self.rows);
    }
}

/// Event emitted to track how long a bronze commit took, lock wait excluded.
pub struct BronzeCommitDuration {
    pub duration: Duration,
    pub cluster: String,
}

impl InternalEvent for BronzeCommitDuration {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            cluster = %self.cluster,
            "Bronze commit duration"
        );
        histogram!("sluice_bronze_commit_duration_seconds", "cluster" => self.cluster)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted whenever the in-flight set changes size.
pub struct FilesInFlight {
    pub count: usize,
}

impl InternalEvent for FilesInFlight {
    fn emit(self) {
        trace!(count = self.count, "Files in flight");
        gauge!("sluice_files_in_flight").set(self.count as f64);
    }
}
