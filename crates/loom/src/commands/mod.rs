//! CLI command implementations.

mod deps;
mod entries;
mod resolve;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use loom_config::{CliSettings, Config};
use loom_content::{ContentLoader, LoaderConfig, MarkdownPipeline, SequenceMode};
use loom_site::Site;

use crate::error::CliError;

pub(crate) use deps::DepsArgs;
pub(crate) use entries::EntriesArgs;
pub(crate) use resolve::ResolveArgs;

/// Options shared by every command that opens a site.
#[derive(Args)]
pub(crate) struct SiteArgs {
    /// Path to configuration file (default: auto-discover loom.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Content root directory (overrides config).
    #[arg(long, global = true, env = "LOOM_CONTENT_ROOT")]
    content_root: Option<PathBuf>,

    /// Component root directory (overrides config).
    #[arg(long, global = true, env = "LOOM_COMPONENTS_ROOT")]
    components_root: Option<PathBuf>,

    /// Splice nested sequences one level into their parent sequence.
    #[arg(long, global = true)]
    flatten_sequences: bool,
}

impl SiteArgs {
    /// Load the configuration and open a site over it.
    pub(crate) fn open(&self) -> Result<Site, CliError> {
        let cli_settings = CliSettings {
            content_root: self.content_root.clone(),
            components_root: self.components_root.clone(),
            flatten_sequences: self.flatten_sequences.then_some(true),
        };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;
        site_from_config(&config)
    }
}

/// Build a site from resolved configuration.
pub(crate) fn site_from_config(config: &Config) -> Result<Site, CliError> {
    let content = &config.content_resolved;
    let components = &config.components_resolved;

    let mut loader_config = LoaderConfig::new(&content.root, &components.root);
    loader_config.index.clone_from(&content.index);
    loader_config
        .reference_field
        .clone_from(&components.reference_field);
    loader_config
        .virtual_prefix
        .clone_from(&components.virtual_prefix);
    loader_config.sequence_mode = SequenceMode::from_flag(content.flatten_sequences);

    let markup = MarkdownPipeline::new(
        config.markdown.extensions.as_slice(),
        config.markdown.extract_title,
    )?;
    tracing::debug!(
        content_root = %content.root.display(),
        components_root = %components.root.display(),
        "Opening site"
    );

    let loader = ContentLoader::new(loader_config).with_markup(Arc::new(markup));
    Ok(Site::new(loader))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_site_from_config_uses_configured_index() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "content/home.yaml", "title: Home\n");
        write(dir.path(), "content/blog/home.md", "# Blog\n");
        write(dir.path(), "content/blog/post.md", "# Post\n");

        let mut config = Config::default_with_base(dir.path());
        config.content_resolved.index = "home".to_owned();

        let site = site_from_config(&config).unwrap();
        let paths: Vec<String> = site.entries().iter().map(|e| e.path.clone()).collect();

        assert_eq!(paths, vec!["", "blog", "blog/post"]);
    }

    #[test]
    fn test_site_from_config_rejects_unknown_markdown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default_with_base(dir.path());
        config.markdown.extensions = vec!["emoji".to_owned()];

        let err = site_from_config(&config).unwrap_err();

        assert!(matches!(err, CliError::Content(_)));
    }

    #[test]
    fn test_site_from_config_resolves_page() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "content/index.yaml",
            "title: Home\n_hero: _blocks/hero.yaml\n",
        );
        write(dir.path(), "content/_blocks/hero.yaml", "heading: Hi\n");

        let site = site_from_config(&Config::default_with_base(dir.path())).unwrap();
        let page = site.load("/").unwrap();

        assert_eq!(page.path, "");
        assert!(page.data.contains_key("hero"));
        assert_eq!(page.dependencies.len(), 2);
    }
}
