//! Set of files currently being processed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::normalize_path;
use crate::metrics::events::FilesInFlight;
use sluice_core::emit;

/// Paths with an active processing task.
///
/// Membership is held by an [`InFlightGuard`] and released when the guard is
/// dropped, whichever way the task ends.
#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `path` unless it is already present.
    ///
    /// Test and insert happen under one lock, so two concurrent callers for
    /// the same path get exactly one guard.
    pub fn try_acquire(&self, path: &Path) -> Option<InFlightGuard> {
        let path = normalize_path(path);
        let count = {
            let mut set = self.lock();
            if !set.insert(path.clone()) {
                return None;
            }
            set.len()
        };
        emit!(FilesInFlight { count });
        Some(InFlightGuard {
            set: self.clone(),
            path,
        })
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(&normalize_path(path))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn release(&self, path: &Path) {
        let count = {
            let mut set = self.lock();
            set.remove(path);
            set.len()
        };
        emit!(FilesInFlight { count });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Membership of one path in an [`InFlightSet`].
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlightSet,
    path: PathBuf,
}

impl InFlightGuard {
    /// The normalized absolute path held.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.release(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected_until_release() {
        let set = InFlightSet::new();
        let path = Path::new("/landing/data/raw/diabetes/a.csv");

        let guard = set.try_acquire(path).unwrap();
        assert!(set.try_acquire(path).is_none());
        assert!(set.contains(path));
        assert_eq!(set.len(), 1);

        drop(guard);
        assert!(set.is_empty());
        assert!(set.try_acquire(path).is_some());
    }

    #[test]
    fn test_relative_and_absolute_forms_collide() {
        let set = InFlightSet::new();
        let relative = Path::new("a.csv");
        let absolute = std::env::current_dir().unwrap().join("a.csv");

        let _guard = set.try_acquire(relative).unwrap();
        assert!(set.try_acquire(&absolute).is_none());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let set = InFlightSet::new();
        let path = PathBuf::from("/tmp/panics.csv");

        let cloned = set.clone();
        let p = path.clone();
        let result = std::thread::spawn(move || {
            let _guard = cloned.try_acquire(&p).unwrap();
            panic!("processing failed");
        })
        .join();

        assert!(result.is_err());
        assert!(!set.contains(&path));
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let set = InFlightSet::new();
        let path = PathBuf::from("/tmp/race.csv");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let set = set.clone();
                let path = path.clone();
                std::thread::spawn(move || set.try_acquire(&path).map(std::mem::forget).is_some())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
    }
}
