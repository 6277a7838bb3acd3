//! Dependency reporting.
//!
//! Every component that reads a file or produces a virtual unit reports it
//! through a [`Reporter`]. The build cache uses the collected reports to decide
//! what to evict when a file changes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::virtual_unit::VirtualUnit;

/// Sink for file dependencies and produced virtual units.
///
/// Reports may arrive from several threads while sibling subtrees are
/// traversed concurrently, so implementations use interior mutability.
pub trait Reporter: Send + Sync {
    /// Record that the computation read or probed `path` (absolute).
    fn file(&self, path: &Path);

    /// Record a finished virtual unit.
    fn virtual_unit(&self, unit: VirtualUnit);
}

/// [`Reporter`] that keeps every report in memory.
///
/// File reports are kept in arrival order, duplicates included.
#[derive(Debug, Default)]
pub struct Recorder {
    files: Mutex<Vec<PathBuf>>,
    units: Mutex<Vec<VirtualUnit>>,
}

impl Recorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All file reports so far, in arrival order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap().clone()
    }

    /// Distinct files reported so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn unique_files(&self) -> BTreeSet<PathBuf> {
        self.files.lock().unwrap().iter().cloned().collect()
    }

    /// Whether `path` has been reported.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn has_file(&self, path: &Path) -> bool {
        self.files.lock().unwrap().iter().any(|p| p == path)
    }

    /// Ids of the virtual units reported so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn unit_ids(&self) -> Vec<String> {
        self.units
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.id.clone())
            .collect()
    }

    /// Virtual units reported so far, in arrival order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn units(&self) -> Vec<VirtualUnit> {
        self.units.lock().unwrap().clone()
    }

    /// Consume the recorder, returning distinct files and all units.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn into_parts(self) -> (BTreeSet<PathBuf>, Vec<VirtualUnit>) {
        let files = self.files.into_inner().unwrap().into_iter().collect();
        let units = self.units.into_inner().unwrap();
        (files, units)
    }
}

impl Reporter for Recorder {
    fn file(&self, path: &Path) {
        self.files.lock().unwrap().push(path.to_path_buf());
    }

    fn virtual_unit(&self, unit: VirtualUnit) {
        self.units.lock().unwrap().push(unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_keeps_duplicates_in_order() {
        let recorder = Recorder::new();
        recorder.file(Path::new("/c/b.yaml"));
        recorder.file(Path::new("/c/a.yaml"));
        recorder.file(Path::new("/c/b.yaml"));

        assert_eq!(recorder.files().len(), 3);
        assert_eq!(recorder.unique_files().len(), 2);
        assert!(recorder.has_file(Path::new("/c/a.yaml")));
        assert!(!recorder.has_file(Path::new("/c/z.yaml")));
    }

    #[test]
    fn test_recorder_into_parts() {
        let recorder = Recorder::new();
        recorder.file(Path::new("/c/a.yaml"));
        let (files, units) = recorder.into_parts();
        assert_eq!(files.len(), 1);
        assert!(units.is_empty());
    }
}
