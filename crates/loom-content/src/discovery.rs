//! Entry discovery by filesystem walking.
//!
//! Maps content files to site paths:
//!
//! - `index.yaml` -> `""`
//! - `guide.md` -> `"guide"`
//! - `domain/index.toml` -> `"domain"`
//! - `domain/setup.json` -> `"domain/setup"`
//!
//! Hidden (`.`) and fragment (`_`) files and directories are skipped, as are
//! files whose extension no parser recognizes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Source precedence: extension priority, then direct file before index file.
type Rank = (usize, bool);

/// A site path and the source file it is loaded from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Site path without leading or trailing slash (`""` for the root).
    pub path: String,
    /// Absolute source file path.
    pub source: PathBuf,
}

/// Walk `root` and return its entries sorted by site path.
///
/// `extensions` lists recognized extensions in priority order; when two files
/// map to the same site path, the higher-priority extension wins, and for
/// equal extensions `<path>.<ext>` wins over `<path>/<index>.<ext>`.
/// Extensions match case-insensitively.
/// Returns an empty list if the root does not exist.
#[must_use]
pub fn discover(root: &Path, index: &str, extensions: &[&str]) -> Vec<Entry> {
    let mut found: BTreeMap<String, (Rank, PathBuf)> = BTreeMap::new();
    if root.is_dir() {
        scan_directory(root, "", index, extensions, &mut found);
    }

    found
        .into_iter()
        .map(|(path, (_, source))| Entry { path, source })
        .collect()
}

fn scan_directory(
    dir_path: &Path,
    prefix: &str,
    index: &str,
    extensions: &[&str],
    found: &mut BTreeMap<String, (Rank, PathBuf)>,
) {
    let Ok(entries) = fs::read_dir(dir_path) else {
        tracing::warn!(path = %dir_path.display(), "Failed to read content directory");
        return;
    };

    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }

        let path = entry.path();
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            let child_prefix = join_site_path(prefix, &name);
            scan_directory(&path, &child_prefix, index, extensions, found);
            continue;
        }

        let Some((stem, extension)) = name.rsplit_once('.') else {
            continue;
        };
        let extension = extension.to_ascii_lowercase();
        let Some(priority) = extensions.iter().position(|e| *e == extension) else {
            continue;
        };
        if stem.is_empty() {
            continue;
        }

        let is_index = stem == index;
        let site_path = if is_index {
            prefix.to_owned()
        } else {
            join_site_path(prefix, stem)
        };
        insert_entry(found, site_path, (priority, is_index), path);
    }
}

fn insert_entry(
    found: &mut BTreeMap<String, (Rank, PathBuf)>,
    site_path: String,
    rank: Rank,
    source: PathBuf,
) {
    match found.get(&site_path) {
        Some((existing, existing_source)) if *existing <= rank => {
            tracing::debug!(
                entry = %site_path,
                kept = %existing_source.display(),
                shadowed = %source.display(),
                "Skipping lower-priority source file"
            );
        }
        Some((_, existing_source)) => {
            tracing::debug!(
                entry = %site_path,
                kept = %source.display(),
                shadowed = %existing_source.display(),
                "Skipping lower-priority source file"
            );
            found.insert(site_path, (rank, source));
        }
        None => {
            found.insert(site_path, (rank, source));
        }
    }
}

fn join_site_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}/{name}")
    }
}
