//! Incremental build cache.
//!
//! [`BuildCache`] caches resolved pages per entry path together with the
//! files each computation read and the virtual units it produced:
//!
//! - pages: entry path -> in-flight or resolved page
//! - units: unit id -> rendered unit, reference-counted by owning entries
//! - file dependents: file -> entries that read it
//! - entry units: entry -> unit ids it produced
//!
//! # Single-flight
//!
//! At most one computation per entry path is in flight. Callers arriving while
//! it runs block on the same slot and receive the same `Arc` result (or the
//! same error).
//!
//! # Consistency
//!
//! A computation's files, units and graph edges are registered together under
//! the cache lock when it completes successfully. A failed computation
//! registers nothing and its slot is removed before the error reaches any
//! caller, so lookups only ever see fully resolved pages.
//!
//! A file change evicts every cached entry that read the file, plus every
//! in-flight computation. Evicted in-flight results are still delivered to
//! their callers but never cached.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use loom_content::{ContentError, Page, Record, Recorder, Reporter, VirtualUnit};
use serde::Serialize;

use crate::error::SiteError;

/// Result of loading a page through the cache.
pub type LoadResult = Result<Arc<ResolvedPage>, SiteError>;

/// A resolved page with its recorded dependencies.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedPage {
    /// Normalized site path.
    pub path: String,
    /// Source file the page was parsed from.
    pub source: PathBuf,
    /// Page data after all passes.
    pub data: Record,
    /// Ids of the virtual units the page references, sorted.
    pub units: Vec<String>,
    /// Every file read while resolving the page.
    pub dependencies: BTreeSet<PathBuf>,
}

/// Entries and units affected by an invalidation, sorted and de-duplicated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Invalidation {
    /// Evicted entry paths.
    pub entries: Vec<String>,
    /// Unit ids owned by the evicted entries.
    pub virtual_units: Vec<String>,
}

impl Invalidation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.virtual_units.is_empty()
    }

    /// Fold `other` in, keeping both lists sorted and de-duplicated.
    pub fn merge(&mut self, other: Self) {
        self.entries.extend(other.entries);
        self.entries.sort();
        self.entries.dedup();
        self.virtual_units.extend(other.virtual_units);
        self.virtual_units.sort();
        self.virtual_units.dedup();
    }
}

/// Cache size counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Resolved pages.
    pub pages: usize,
    /// Computations in flight.
    pub in_flight: usize,
    /// Cached virtual units.
    pub units: usize,
    /// Files with at least one dependent entry.
    pub files: usize,
}

/// Completion slot shared by every caller of one computation.
#[derive(Default)]
struct InFlight {
    result: Mutex<Option<LoadResult>>,
    ready: Condvar,
}

impl InFlight {
    fn wait(&self) -> LoadResult {
        let mut guard = self.result.lock().unwrap();
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = self.ready.wait(guard).unwrap();
        }
    }

    fn publish(&self, result: LoadResult) {
        *self.result.lock().unwrap() = Some(result);
        self.ready.notify_all();
    }
}

enum SlotState {
    Pending { recorder: Arc<Recorder> },
    Ready { page: Arc<ResolvedPage> },
}

struct PageSlot {
    inflight: Arc<InFlight>,
    state: SlotState,
}

struct UnitEntry {
    unit: Arc<VirtualUnit>,
    owners: BTreeSet<String>,
}

#[derive(Default)]
struct CacheState {
    pages: HashMap<String, PageSlot>,
    units: HashMap<String, UnitEntry>,
    file_dependents: HashMap<PathBuf, BTreeSet<String>>,
    entry_units: HashMap<String, BTreeSet<String>>,
}

impl CacheState {
    /// Whether `inflight` is still the registered slot for `path`.
    fn is_current(&self, path: &str, inflight: &Arc<InFlight>) -> bool {
        self.pages
            .get(path)
            .is_some_and(|slot| Arc::ptr_eq(&slot.inflight, inflight))
    }

    /// Remove an entry with its graph edges, returning the unit ids it owned.
    fn evict_entry(&mut self, entry: &str) -> BTreeSet<String> {
        if let Some(PageSlot {
            state: SlotState::Ready { page },
            ..
        }) = self.pages.remove(entry)
        {
            for file in &page.dependencies {
                if let Some(dependents) = self.file_dependents.get_mut(file) {
                    dependents.remove(entry);
                    if dependents.is_empty() {
                        self.file_dependents.remove(file);
                    }
                }
            }
        }

        let ids = self.entry_units.remove(entry).unwrap_or_default();
        for id in &ids {
            if let Some(unit) = self.units.get_mut(id) {
                unit.owners.remove(entry);
                if unit.owners.is_empty() {
                    self.units.remove(id);
                }
            }
        }
        ids
    }

    fn find_collision(&self, units: &[VirtualUnit]) -> Option<String> {
        let mut seen: HashMap<&str, &VirtualUnit> = HashMap::new();
        for unit in units {
            let existing = seen
                .get(unit.id.as_str())
                .copied()
                .or_else(|| self.units.get(&unit.id).map(|e| e.unit.as_ref()));
            if let Some(existing) = existing
                && (existing.source != unit.source || existing.options != unit.options)
            {
                return Some(unit.id.clone());
            }
            seen.insert(&unit.id, unit);
        }
        None
    }

    fn register(&mut self, page: &Arc<ResolvedPage>, units: Vec<VirtualUnit>) {
        let path = &page.path;
        for unit in units {
            self.units
                .entry(unit.id.clone())
                .or_insert_with(|| UnitEntry {
                    unit: Arc::new(unit),
                    owners: BTreeSet::new(),
                })
                .owners
                .insert(path.clone());
        }
        for file in &page.dependencies {
            self.file_dependents
                .entry(file.clone())
                .or_default()
                .insert(path.clone());
        }
        self.entry_units
            .insert(path.clone(), page.units.iter().cloned().collect());
    }
}

/// Removes the slot and fails waiters if a computation unwinds.
struct SlotGuard<'a> {
    cache: &'a BuildCache,
    path: &'a str,
    inflight: &'a Arc<InFlight>,
    armed: bool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state) = self.cache.state.lock()
            && state.is_current(self.path, self.inflight)
        {
            state.pages.remove(self.path);
        }
        tracing::warn!(entry = %self.path, "Page computation panicked");
        self.inflight
            .publish(Err(SiteError::from(ContentError::InvariantViolation(
                format!("computation of '{}' panicked", self.path),
            ))));
    }
}

/// Page cache with single-flight loading and dependency tracking.
///
/// # Thread Safety
///
/// All state lives behind one mutex that is never held while a page is
/// computed or while waiting for another computation.
#[derive(Default)]
pub struct BuildCache {
    state: Mutex<CacheState>,
}

impl fmt::Debug for BuildCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildCache")
            .field("stats", &self.stats())
            .finish()
    }
}

impl BuildCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap()
    }

    /// Return the cached page for `path`, computing it at most once.
    ///
    /// `compute` receives the reporter collecting file dependencies and
    /// virtual units. Concurrent callers for the same path share one
    /// computation.
    ///
    /// # Errors
    ///
    /// Returns the computation's error, or `VirtualUnitCollision` if a
    /// produced unit id is registered for different content.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned, or re-raises a panic from
    /// `compute` after failing its waiters.
    pub fn get_or_load<F>(&self, path: &str, compute: F) -> LoadResult
    where
        F: FnOnce(&dyn Reporter) -> Result<Page, ContentError>,
    {
        let (inflight, recorder) = {
            let mut state = self.lock();
            let existing = state.pages.get(path).map(|slot| match &slot.state {
                SlotState::Ready { page } => Ok(Arc::clone(page)),
                SlotState::Pending { .. } => Err(Arc::clone(&slot.inflight)),
            });
            match existing {
                Some(Ok(page)) => {
                    tracing::debug!(entry = %path, "Cache hit");
                    return Ok(page);
                }
                Some(Err(inflight)) => {
                    drop(state);
                    tracing::debug!(entry = %path, "Joining in-flight computation");
                    return inflight.wait();
                }
                None => {}
            }

            tracing::debug!(entry = %path, "Cache miss");
            let inflight = Arc::new(InFlight::default());
            let recorder = Arc::new(Recorder::new());
            state.pages.insert(
                path.to_owned(),
                PageSlot {
                    inflight: Arc::clone(&inflight),
                    state: SlotState::Pending {
                        recorder: Arc::clone(&recorder),
                    },
                },
            );
            (inflight, recorder)
        };

        let mut guard = SlotGuard {
            cache: self,
            path,
            inflight: &inflight,
            armed: true,
        };
        let outcome = compute(recorder.as_ref());
        guard.armed = false;
        drop(guard);

        let result = self.complete(path, &inflight, &recorder, outcome);
        inflight.publish(result.clone());
        result
    }

    fn complete(
        &self,
        path: &str,
        inflight: &Arc<InFlight>,
        recorder: &Recorder,
        outcome: Result<Page, ContentError>,
    ) -> LoadResult {
        let mut state = self.lock();
        let current = state.is_current(path, inflight);

        let page = match outcome {
            Ok(page) => page,
            Err(e) => {
                if current {
                    state.pages.remove(path);
                }
                tracing::debug!(entry = %path, error = %e, "Page computation failed");
                return Err(SiteError::from(e));
            }
        };

        let units = recorder.units();
        let resolved = Arc::new(ResolvedPage {
            path: path.to_owned(),
            source: page.source,
            data: page.data,
            units: units
                .iter()
                .map(|u| u.id.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            dependencies: recorder.unique_files(),
        });

        if !current {
            tracing::debug!(entry = %path, "Entry evicted during computation, not caching");
            return Ok(resolved);
        }

        if let Some(id) = state.find_collision(&units) {
            state.pages.remove(path);
            tracing::warn!(entry = %path, unit = %id, "Virtual unit id collision");
            return Err(SiteError::VirtualUnitCollision { id });
        }

        state.register(&resolved, units);
        if let Some(slot) = state.pages.get_mut(path) {
            slot.state = SlotState::Ready {
                page: Arc::clone(&resolved),
            };
        }
        tracing::debug!(
            entry = %path,
            files = resolved.dependencies.len(),
            units = resolved.units.len(),
            "Cached page"
        );
        Ok(resolved)
    }

    /// Evict everything that depends on `file`.
    ///
    /// Cached entries that read `file` are evicted together with their unit
    /// ownership. All in-flight computations are evicted as well; those that
    /// had already read `file` are reported.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn invalidate_file(&self, file: &Path) -> Invalidation {
        let mut state = self.lock();

        let mut entries = state
            .file_dependents
            .get(file)
            .cloned()
            .unwrap_or_default();

        let pending: Vec<(String, bool)> = state
            .pages
            .iter()
            .filter_map(|(path, slot)| match &slot.state {
                SlotState::Pending { recorder } => Some((path.clone(), recorder.has_file(file))),
                SlotState::Ready { .. } => None,
            })
            .collect();
        for (path, read_file) in pending {
            state.pages.remove(&path);
            if read_file {
                entries.insert(path);
            }
        }

        let mut units = BTreeSet::new();
        for entry in &entries {
            units.extend(state.evict_entry(entry));
        }

        if !entries.is_empty() {
            tracing::debug!(
                file = %file.display(),
                entries = entries.len(),
                units = units.len(),
                "Evicted dependents of changed file"
            );
        }

        Invalidation {
            entries: entries.into_iter().collect(),
            virtual_units: units.into_iter().collect(),
        }
    }

    /// Evict one entry, cached or in flight.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn invalidate_entry(&self, path: &str) -> Invalidation {
        let mut state = self.lock();
        if !state.pages.contains_key(path) {
            return Invalidation::default();
        }
        let units = state.evict_entry(path);
        Invalidation {
            entries: vec![path.to_owned()],
            virtual_units: units.into_iter().collect(),
        }
    }

    /// Drop every page, unit and graph edge.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn clear(&self) {
        *self.lock() = CacheState::default();
    }

    /// Cached page for `path`, if resolved.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn page(&self, path: &str) -> Option<Arc<ResolvedPage>> {
        match &self.lock().pages.get(path)?.state {
            SlotState::Ready { page } => Some(Arc::clone(page)),
            SlotState::Pending { .. } => None,
        }
    }

    /// Cached virtual unit.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn unit(&self, id: &str) -> Option<Arc<VirtualUnit>> {
        self.lock().units.get(id).map(|e| Arc::clone(&e.unit))
    }

    /// Cached entries that read `file`, sorted.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn dependents_of(&self, file: &Path) -> Vec<String> {
        self.lock()
            .file_dependents
            .get(file)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Unit ids owned by a cached entry, sorted.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn units_of(&self, path: &str) -> Vec<String> {
        self.lock()
            .entry_units
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Current cache sizes.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let in_flight = state
            .pages
            .values()
            .filter(|slot| matches!(slot.state, SlotState::Pending { .. }))
            .count();
        CacheStats {
            pages: state.pages.len() - in_flight,
            in_flight,
            units: state.units.len(),
            files: state.file_dependents.len(),
        }
    }
}
