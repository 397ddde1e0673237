//! Cluster directory watching and dispatch.
//!
//! The watcher processes the backlog of every cluster directory first, then
//! follows new files announced by the [`DirectoryObserver`]. Each accepted file
//! runs in its own task after the settle delay; the [`InFlightSet`] keeps a
//! path from being processed twice at once.

mod inflight;
mod observer;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snafu::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use inflight::{InFlightGuard, InFlightSet};
pub use observer::{DirectoryObserver, FileEvent};

use crate::config::{ClusterKey, Config, normalize_path};
use crate::error::{ClusterDirSnafu, IngestError, PipelineError, TaskJoinSnafu};
use crate::metrics::events::{DiscoveryOrigin, DuplicateEventDropped, FileDiscovered};
use crate::pipeline::{FileOutcome, IncomingFile, IngestPipeline, is_regular_file};
use crate::sink::{DeltaStore, TableStore};
use sluice_core::emit;
use sluice_core::polling::run_polling_loop;

const SERVICE: &str = "sluice";

/// Totals of a startup scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Watches the configured cluster directories and feeds the pipeline.
pub struct ClusterWatcher<S: TableStore = DeltaStore> {
    config: Arc<Config>,
    pipeline: Arc<IngestPipeline<S>>,
    in_flight: InFlightSet,
    tasks: JoinSet<()>,
}

impl ClusterWatcher<DeltaStore> {
    pub fn from_config(config: Config) -> Self {
        let pipeline = IngestPipeline::from_config(&config);
        Self::new(config, pipeline)
    }
}

impl<S: TableStore> ClusterWatcher<S> {
    pub fn new(config: Config, pipeline: IngestPipeline<S>) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            in_flight: InFlightSet::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<IngestPipeline<S>> {
        &self.pipeline
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Number of spawned tasks not yet reaped.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Resolve cluster directories, creating or skipping missing ones.
    ///
    /// Returns the existing directories, absolute, in configuration order.
    pub fn prepare_dirs(&self) -> Result<Vec<(ClusterKey, PathBuf)>, PipelineError> {
        let mut dirs = Vec::with_capacity(self.config.clusters.len());
        for (key, dir) in self.config.cluster_dirs() {
            let dir = normalize_path(&dir);
            if !dir.is_dir() {
                if !self.config.create_missing_dirs {
                    warn!(cluster = %key, dir = %dir.display(), "Cluster directory missing, skipping");
                    continue;
                }
                std::fs::create_dir_all(&dir).context(ClusterDirSnafu { path: &dir })?;
                info!(cluster = %key, dir = %dir.display(), "Created cluster directory");
            }
            dirs.push((key.clone(), dir));
        }
        Ok(dirs)
    }

    /// Process every existing supported file, one at a time.
    ///
    /// Clusters are visited in configuration order and files in file-name
    /// order. Failures are logged and counted, never propagated.
    pub async fn startup_scan(&self, dirs: &[(ClusterKey, PathBuf)]) -> ScanSummary {
        let paths: Vec<PathBuf> = dirs.iter().map(|(_, dir)| dir.clone()).collect();
        let snapshot = DirectoryObserver::snapshot(&paths);
        self.scan_snapshot(dirs, &snapshot).await
    }

    /// [`startup_scan`](Self::startup_scan) restricted to the files in
    /// `snapshot`.
    ///
    /// Files created after the snapshot are left to the observer.
    pub async fn scan_snapshot(
        &self,
        dirs: &[(ClusterKey, PathBuf)],
        snapshot: &HashSet<PathBuf>,
    ) -> ScanSummary {
        let mut summary = ScanSummary::default();

        for (cluster, dir) in dirs {
            let files = self.backlog(dir, snapshot);
            info!(cluster = %cluster, files = files.len(), "Scanning cluster directory");

            for path in files {
                let Some(guard) = self.in_flight.try_acquire(&path) else {
                    debug!(path = %path.display(), "Already in flight, skipping");
                    continue;
                };
                emit!(FileDiscovered {
                    origin: DiscoveryOrigin::Scan,
                    cluster: cluster.to_string(),
                });

                let file = IncomingFile::new(guard.path(), cluster.clone());
                match self.pipeline.process(&file).await {
                    Ok(FileOutcome::Written { .. }) => summary.written += 1,
                    Ok(FileOutcome::Empty) => summary.skipped += 1,
                    Err(IngestError::UnsupportedFormat { .. }) => summary.skipped += 1,
                    Err(_) => summary.failed += 1,
                }
            }
        }

        info!(
            written = summary.written,
            skipped = summary.skipped,
            failed = summary.failed,
            "Startup scan complete"
        );
        summary
    }

    /// Supported files of `snapshot` directly inside `dir`, sorted by file name.
    fn backlog(&self, dir: &Path, snapshot: &HashSet<PathBuf>) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = snapshot
            .iter()
            .filter(|path| path.parent() == Some(dir) && self.config.is_supported(path))
            .cloned()
            .collect();
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        files
    }

    /// Handle a created-file event.
    ///
    /// Returns true if a processing task was spawned.
    pub fn on_file_created(&mut self, path: PathBuf) -> bool {
        if !self.config.is_supported(&path) {
            info!(path = %path.display(), "Ignoring file with unsupported extension");
            return false;
        }

        let cluster = self.config.cluster_for_path(&path);
        let Some(guard) = self.in_flight.try_acquire(&path) else {
            debug!(path = %path.display(), cluster = %cluster, "File already in flight, dropping event");
            emit!(DuplicateEventDropped {
                cluster: cluster.to_string(),
            });
            return false;
        };
        emit!(FileDiscovered {
            origin: DiscoveryOrigin::Watch,
            cluster: cluster.to_string(),
        });

        let pipeline = Arc::clone(&self.pipeline);
        let settle_delay = self.config.settle_delay();
        self.tasks.spawn(async move {
            tokio::time::sleep(settle_delay).await;

            let file = IncomingFile::new(guard.path(), cluster);
            if !is_regular_file(&file.path) {
                warn!(file = %file.name(), cluster = %file.cluster, "File disappeared before processing");
                return;
            }
            // Outcome is logged and counted by the pipeline.
            let _ = pipeline.process(&file).await;
            drop(guard);
        });
        true
    }

    /// Scan the backlog, then follow new files until `shutdown` fires.
    ///
    /// On shutdown the observer stops first, then running tasks are drained.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), PipelineError> {
        let dirs = self.prepare_dirs()?;
        let paths: Vec<PathBuf> = dirs.iter().map(|(_, dir)| dir.clone()).collect();

        // The scan and the observer share one snapshot: scanned files are
        // never re-announced, and later files are left to the observer.
        let baseline = DirectoryObserver::snapshot(&paths);
        self.scan_snapshot(&dirs, &baseline).await;

        let (tx, mut rx) = mpsc::channel(self.config.event_buffer.max(1));
        let mut observer = DirectoryObserver::with_baseline(paths, baseline, tx);
        let poll_interval = self.config.poll_interval();
        let observer_shutdown = shutdown.clone();
        let observer_task = tokio::spawn(async move {
            run_polling_loop(
                &mut observer,
                poll_interval,
                observer_shutdown,
                "directory-observer",
                SERVICE,
            )
            .await
        });

        info!(clusters = dirs.len(), "Watching cluster directories");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping watcher");
                    break;
                }

                event = rx.recv() => match event {
                    Some(FileEvent::Created(path)) => {
                        self.on_file_created(path);
                    }
                    None => {
                        warn!("Directory observer stopped");
                        break;
                    }
                },

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "File task panicked");
                    }
                }
            }
        }

        drop(rx);
        let Ok(()) = observer_task.await.context(TaskJoinSnafu)?;
        self.drain().await;
        Ok(())
    }

    /// Wait for every spawned task to finish.
    pub async fn drain(&mut self) {
        if !self.tasks.is_empty() {
            info!(tasks = self.tasks.len(), "Waiting for in-flight files");
        }
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "File task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BronzeWriter;
    use crate::source::SourceReaders;
    use tempfile::TempDir;

    fn config(root: &std::path::Path) -> Config {
        Config::parse(&format!(
            r#"
landing_root: {root}/landing
bronze_root: {root}/bronze
settle_delay_ms: 10
clusters:
  diabetes: {{}}
  renda_extra: {{}}
"#,
            root = root.display()
        ))
        .unwrap()
    }

    fn watcher(config: Config) -> ClusterWatcher {
        ClusterWatcher::from_config(config)
    }

    #[test]
    fn test_prepare_dirs_skips_or_creates_missing() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(tmp.path());
        std::fs::create_dir_all(tmp.path().join("landing/data/raw/diabetes")).unwrap();

        let dirs = watcher(cfg.clone()).prepare_dirs().unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].0, ClusterKey::new("diabetes"));

        cfg.create_missing_dirs = true;
        let dirs = watcher(cfg).prepare_dirs().unwrap();
        assert_eq!(dirs.len(), 2);
        assert!(tmp.path().join("landing/data/raw/renda_extra").is_dir());
    }

    #[tokio::test]
    async fn test_unsupported_extension_ignored() {
        let tmp = TempDir::new().unwrap();
        let mut w = watcher(config(tmp.path()));

        assert!(!w.on_file_created(tmp.path().join("landing/data/raw/diabetes/notas.txt")));
        assert_eq!(w.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_vanished_file_releases_marker() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let pipeline = IngestPipeline::new(
            SourceReaders::default(),
            BronzeWriter::new(DeltaStore::new(&cfg.bronze_root)),
        );
        let mut w = ClusterWatcher::new(cfg, pipeline);
        let path = tmp.path().join("landing/data/raw/diabetes/sumiu.csv");

        assert!(w.on_file_created(path.clone()));
        assert!(w.in_flight().contains(&path));

        w.drain().await;
        assert!(w.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_scan_snapshot_leaves_later_files_alone() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("landing/data/raw/diabetes");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.csv"), "id\n1\n").unwrap();

        let w = watcher(config(tmp.path()));
        let dirs = w.prepare_dirs().unwrap();
        let snapshot = DirectoryObserver::snapshot(&[dirs[0].1.clone()]);
        std::fs::write(dir.join("b.csv"), "id\n2\n").unwrap();

        let summary = w.scan_snapshot(&dirs, &snapshot).await;
        assert_eq!(summary.written, 1);

        let stats = crate::sink::bronze_stats(&tmp.path().join("bronze")).await.unwrap();
        assert_eq!(stats["diabetes"].rows, 1);
    }

    #[tokio::test]
    async fn test_startup_scan_processes_backlog_in_name_order() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let dir = tmp.path().join("landing/data/raw/diabetes");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("b.csv"), "id,valor\n1,x\n").unwrap();
        std::fs::write(dir.join("a.csv"), "id,valor\n2,y\n3,z\n").unwrap();
        std::fs::write(dir.join("vazio.csv"), "id,valor\n").unwrap();
        std::fs::write(dir.join("leia-me.txt"), "ignored").unwrap();

        let w = watcher(cfg);
        let dirs = w.prepare_dirs().unwrap();
        let summary = w.startup_scan(&dirs).await;

        assert_eq!(
            summary,
            ScanSummary {
                written: 2,
                skipped: 1,
                failed: 0
            }
        );
        assert!(w.in_flight().is_empty());

        let stats = crate::sink::bronze_stats(&tmp.path().join("bronze")).await.unwrap();
        assert_eq!(stats["diabetes"].rows, 3);
        assert_eq!(stats["diabetes"].version, 2);
    }
}
