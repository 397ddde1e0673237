//! Polling directory observer.
//!
//! Diffs a snapshot of the watched directories on every iteration and
//! announces new files on a bounded channel.

use std::collections::HashSet;
use std::convert::Infallible;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sluice_core::polling::{IterationResult, PollingProcessor};

/// Filesystem event announced by the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
}

/// Announces regular files that appear in any of `dirs`.
pub struct DirectoryObserver {
    dirs: Vec<PathBuf>,
    known: HashSet<PathBuf>,
    events: mpsc::Sender<FileEvent>,
}

impl DirectoryObserver {
    /// Observer that treats every file present at the first poll as new.
    pub fn new(dirs: Vec<PathBuf>, events: mpsc::Sender<FileEvent>) -> Self {
        Self::with_baseline(dirs, HashSet::new(), events)
    }

    /// Observer that never announces the files in `baseline`.
    pub fn with_baseline(
        dirs: Vec<PathBuf>,
        baseline: HashSet<PathBuf>,
        events: mpsc::Sender<FileEvent>,
    ) -> Self {
        Self {
            dirs,
            known: baseline,
            events,
        }
    }

    /// Regular files directly inside each of `dirs`.
    ///
    /// Unreadable directories contribute nothing.
    pub fn snapshot(dirs: &[PathBuf]) -> HashSet<PathBuf> {
        let mut files = HashSet::new();
        for dir in dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "Cannot list directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    files.insert(entry.path());
                }
            }
        }
        files
    }
}

#[async_trait]
impl PollingProcessor for DirectoryObserver {
    type State = Vec<PathBuf>;
    type Error = Infallible;

    async fn prepare(&mut self, _cold_start: bool) -> Result<Option<Vec<PathBuf>>, Infallible> {
        let current = Self::snapshot(&self.dirs);
        let mut created: Vec<PathBuf> = current.difference(&self.known).cloned().collect();
        self.known = current;

        if created.is_empty() {
            return Ok(None);
        }
        created.sort();
        Ok(Some(created))
    }

    async fn process(&mut self, created: Vec<PathBuf>) -> Result<IterationResult, Infallible> {
        for path in created {
            debug!(path = %path.display(), "File created");
            if self.events.send(FileEvent::Created(path)).await.is_err() {
                warn!("File event receiver closed, stopping observer");
                return Ok(IterationResult::Shutdown);
            }
        }
        Ok(IterationResult::ProcessedItems)
    }
}
