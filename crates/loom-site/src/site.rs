//! Site facade.
//!
//! [`Site`] owns a [`ContentLoader`] and a [`BuildCache`] and is the entry
//! point for hosts: load pages, react to file changes, look up virtual units.
//!
//! # Example
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::path::Path;
//! use loom_content::{ContentLoader, LoaderConfig};
//! use loom_site::Site;
//!
//! let site = Site::new(ContentLoader::new(LoaderConfig::new("content", "components")));
//!
//! let page = site.load("guide")?;
//!
//! // A watcher reported a change: evict what depended on it.
//! let invalidation = site.file_changed(Path::new("_shared/footer.yaml"));
//! for entry in &invalidation.entries {
//!     site.load(entry)?;
//! }
//! # let _ = page;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use loom_content::{ContentLoader, Entry, VirtualUnit, normalize_path};

use crate::build_cache::{BuildCache, Invalidation, LoadResult};

/// Content loader combined with its build cache.
#[derive(Debug)]
pub struct Site {
    loader: ContentLoader,
    cache: BuildCache,
}

impl Site {
    #[must_use]
    pub fn new(loader: ContentLoader) -> Self {
        Self {
            loader,
            cache: BuildCache::new(),
        }
    }

    #[must_use]
    pub fn loader(&self) -> &ContentLoader {
        &self.loader
    }

    #[must_use]
    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    /// Currently discovered entries.
    pub fn entries(&self) -> Arc<Vec<Entry>> {
        self.loader.entries()
    }

    /// Re-run entry discovery.
    pub fn refresh(&self) -> Arc<Vec<Entry>> {
        self.loader.refresh()
    }

    /// Load a page through the cache.
    ///
    /// # Errors
    ///
    /// Returns the loader's error or a cache-level error.
    pub fn load(&self, path: &str) -> LoadResult {
        let path = normalize_path(path);
        self.cache
            .get_or_load(path, |reporter| self.loader.load(path, reporter))
    }

    /// Handle a change (edit, creation or removal) of `path`.
    ///
    /// Relative paths are resolved against the content root. Returns the
    /// evicted entries and virtual units. A change to a file that could be an
    /// entry also refreshes the entry list, and evicts every cached entry
    /// whose source file is no longer the discovered one.
    pub fn file_changed(&self, path: &Path) -> Invalidation {
        let path = self.absolute(path);
        let mut invalidation = self.cache.invalidate_file(&path);

        if self.is_discoverable(&path) {
            let before = self.loader.entries();
            let after = self.loader.refresh();
            for entry in changed_sources(&before, &after) {
                invalidation.merge(self.cache.invalidate_entry(entry));
            }
        }

        tracing::debug!(
            path = %path.display(),
            entries = invalidation.entries.len(),
            units = invalidation.virtual_units.len(),
            "File changed"
        );
        invalidation
    }

    /// Cached virtual unit by id.
    #[must_use]
    pub fn virtual_unit(&self, id: &str) -> Option<Arc<VirtualUnit>> {
        self.cache.unit(id)
    }

    /// Drop every cached page and unit.
    pub fn clear(&self) {
        self.cache.clear();
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.loader.content_root().join(path)
        }
    }

    /// Whether discovery would pick `path` up as an entry.
    fn is_discoverable(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(self.loader.content_root()) else {
            return false;
        };
        let visible = relative.components().all(|c| match c {
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                !part.starts_with('.') && !part.starts_with('_')
            }
            _ => false,
        });
        visible && self.loader.parser().supports(path)
    }
}

/// Site paths that were added, removed or moved to another source file.
fn changed_sources<'a>(before: &'a [Entry], after: &'a [Entry]) -> BTreeSet<&'a str> {
    let old: BTreeMap<&str, &Path> = before
        .iter()
        .map(|e| (e.path.as_str(), e.source.as_path()))
        .collect();
    let new: BTreeMap<&str, &Path> = after
        .iter()
        .map(|e| (e.path.as_str(), e.source.as_path()))
        .collect();

    old.keys()
        .chain(new.keys())
        .filter(|path| old.get(*path) != new.get(*path))
        .copied()
        .collect()
}
