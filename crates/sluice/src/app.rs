//! Entry points behind each CLI subcommand.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use snafu::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{ClusterKey, Config, ConfigArgs};
use crate::error::{IngestSnafu, PipelineError, StatsEncodeSnafu};
use crate::pipeline::{FileOutcome, IncomingFile, IngestPipeline};
use crate::sink::{TableStats, bronze_stats};
use crate::watcher::{ClusterWatcher, ScanSummary};
use sluice_core::{init_metrics, shutdown_signal};

/// Load and validate configuration from the CLI flags.
pub fn load_config(args: &ConfigArgs) -> Result<Config, PipelineError> {
    let paths = args.config_paths();
    info!("Loading config from {} source(s)", paths.len());
    let config = Config::from_paths(&paths)?;

    info!(
        landing_root = %config.landing_root.display(),
        bronze_root = %config.bronze_root.display(),
        "Loaded config with {} cluster(s)",
        config.clusters.len()
    );
    for (key, dir) in config.cluster_dirs() {
        info!("  Cluster: {} ({} -> {})", key, dir.display(), config.table_dir(key).display());
    }
    Ok(config)
}

/// Scan, then watch until a shutdown signal arrives.
pub async fn run_service(config: Config) -> Result<(), PipelineError> {
    init_metrics(&config.metrics.address, stats_router(config.bronze_root.clone()))?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    ClusterWatcher::from_config(config).run(shutdown).await?;
    info!("Watcher stopped");
    Ok(())
}

/// Process the existing backlog once.
pub async fn run_scan(config: Config) -> Result<ScanSummary, PipelineError> {
    let watcher = ClusterWatcher::from_config(config);
    let dirs = watcher.prepare_dirs()?;
    Ok(watcher.startup_scan(&dirs).await)
}

/// Ingest a single file into `cluster`'s bronze table.
pub async fn run_ingest(
    config: &Config,
    cluster: ClusterKey,
    path: &Path,
) -> Result<FileOutcome, PipelineError> {
    let pipeline = IngestPipeline::from_config(config);
    let file = IncomingFile::new(path, cluster);
    pipeline.process(&file).await.context(IngestSnafu { path })
}

/// Bronze table stats as pretty-printed JSON.
pub async fn stats_report(bronze_root: &Path) -> Result<String, PipelineError> {
    let stats = bronze_stats(bronze_root).await?;
    serde_json::to_string_pretty(&stats).context(StatsEncodeSnafu)
}

/// `GET /stats`, served next to the metrics endpoints.
pub fn stats_router(bronze_root: PathBuf) -> Router {
    Router::new().route(
        "/stats",
        get(move || {
            let bronze_root = bronze_root.clone();
            async move { stats_handler(&bronze_root).await }
        }),
    )
}

async fn stats_handler(
    bronze_root: &Path,
) -> Result<Json<BTreeMap<String, TableStats>>, (StatusCode, String)> {
    bronze_stats(bronze_root).await.map(Json).map_err(|e| {
        error!(error = %e, "Failed to collect bronze stats");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}
