//! Sluice: landing-zone to bronze Delta Lake ingestion.
//!
//! This crate handles:
//! - Watching per-cluster landing directories for CSV and Excel files
//! - Decoding files into Arrow tables with inferred column types
//! - Normalizing column types so successive files append cleanly
//! - Appending to one schema-merging Delta table per cluster

pub mod annotate;
pub mod app;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod schema;
pub mod sink;
pub mod source;
pub mod watcher;

// Re-export commonly used items
pub use config::{ClusterKey, Config, ConfigArgs};
pub use error::{IngestError, PipelineError};
pub use pipeline::{FileOutcome, IncomingFile, IngestPipeline};
pub use sink::{BronzeWriter, DeltaStore, TableStats, TableStore, bronze_stats};
pub use watcher::{ClusterWatcher, InFlightSet, ScanSummary};

// Re-export from sluice-core
pub use sluice_core::{init_metrics, init_tracing, shutdown_signal};
