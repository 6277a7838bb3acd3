//! `loom entries` command implementation.

use std::path::Path;

use clap::Args;
use loom_content::Entry;

use super::SiteArgs;
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the entries command.
#[derive(Args)]
pub(crate) struct EntriesArgs {
    /// Print entries as a JSON array.
    #[arg(long)]
    json: bool,
}

impl EntriesArgs {
    /// Execute the entries command.
    pub(crate) fn execute(self, site: &SiteArgs, output: &Output) -> Result<(), CliError> {
        let site = site.open()?;
        let entries = site.entries();

        if self.json {
            return output.json(entries.as_slice());
        }

        let root = site.loader().content_root();
        for entry in entries.iter() {
            output.line(&format_entry(entry, root))?;
        }

        if entries.is_empty() {
            output.warning(&format!("No entries found in {}", root.display()));
        } else {
            output.success(&format!("{} entries", entries.len()));
        }
        Ok(())
    }
}

/// `/<path>  <source relative to root>`.
fn format_entry(entry: &Entry, root: &Path) -> String {
    let source = entry.source.strip_prefix(root).unwrap_or(&entry.source);
    format!("/{}\t{}", entry.path, source.display())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_format_entry_relative_source() {
        let entry = Entry {
            path: "blog/post".to_owned(),
            source: PathBuf::from("/site/content/blog/post.md"),
        };

        assert_eq!(
            format_entry(&entry, Path::new("/site/content")),
            "/blog/post\tblog/post.md"
        );
    }

    #[test]
    fn test_format_entry_root() {
        let entry = Entry {
            path: String::new(),
            source: PathBuf::from("/site/content/index.yaml"),
        };

        assert_eq!(
            format_entry(&entry, Path::new("/site/content")),
            "/\tindex.yaml"
        );
    }
}
