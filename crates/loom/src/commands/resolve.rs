//! `loom resolve` command implementation.

use std::sync::Arc;

use clap::Args;
use loom_content::VirtualUnit;
use loom_site::ResolvedPage;
use serde::Serialize;

use super::SiteArgs;
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the resolve command.
#[derive(Args)]
pub(crate) struct ResolveArgs {
    /// Site path of the entry (e.g. `/blog/post`).
    path: String,

    /// Include the rendered virtual units next to the page.
    #[arg(long)]
    units: bool,
}

/// Page together with the virtual units it references.
#[derive(Serialize)]
struct PageWithUnits<'a> {
    page: &'a ResolvedPage,
    units: Vec<&'a VirtualUnit>,
}

impl ResolveArgs {
    /// Execute the resolve command.
    pub(crate) fn execute(self, site: &SiteArgs, output: &Output) -> Result<(), CliError> {
        let site = site.open()?;
        let page = site.load(&self.path)?;

        if !self.units {
            return output.json(page.as_ref());
        }

        let units: Vec<Arc<VirtualUnit>> = page
            .units
            .iter()
            .filter_map(|id| site.virtual_unit(id))
            .collect();
        output.json(&PageWithUnits {
            page: &page,
            units: units.iter().map(Arc::as_ref).collect(),
        })
    }
}
