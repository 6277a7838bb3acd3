//! `loom deps` command implementation.

use std::path::{Path, PathBuf};

use clap::Args;
use loom_site::ResolvedPage;
use serde::Serialize;

use super::SiteArgs;
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the deps command.
#[derive(Args)]
pub(crate) struct DepsArgs {
    /// Site path of the entry (e.g. `/blog/post`).
    path: String,

    /// Print dependencies as JSON.
    #[arg(long)]
    json: bool,
}

/// Dependency report for one entry.
#[derive(Debug, PartialEq, Serialize)]
struct Dependencies {
    path: String,
    files: Vec<PathBuf>,
    virtual_units: Vec<String>,
}

impl Dependencies {
    fn of(page: &ResolvedPage, root: &Path) -> Self {
        Self {
            path: page.path.clone(),
            files: page
                .dependencies
                .iter()
                .map(|file| file.strip_prefix(root).unwrap_or(file).to_path_buf())
                .collect(),
            virtual_units: page.units.clone(),
        }
    }
}

impl DepsArgs {
    /// Execute the deps command.
    pub(crate) fn execute(self, site: &SiteArgs, output: &Output) -> Result<(), CliError> {
        let site = site.open()?;
        let page = site.load(&self.path)?;
        let deps = Dependencies::of(&page, site.loader().content_root());

        if self.json {
            return output.json(&deps);
        }

        output.highlight(&format!("Files ({})", deps.files.len()));
        for file in &deps.files {
            output.line(&file.display().to_string())?;
        }
        output.highlight(&format!("Virtual units ({})", deps.virtual_units.len()));
        for id in &deps.virtual_units {
            output.line(id)?;
        }
        Ok(())
    }
}
