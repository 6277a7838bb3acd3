//! Configuration management for Loom.
//!
//! Parses `loom.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! Path values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `content.root`
//! - `components.root`

mod expand;

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override content root directory.
    pub content_root: Option<PathBuf>,
    /// Override renderer (component) root directory.
    pub components_root: Option<PathBuf>,
    /// Override sequence flattening compatibility switch.
    pub flatten_sequences: Option<bool>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "loom.toml";

/// Default unit-reference field name.
pub const DEFAULT_REFERENCE_FIELD: &str = "component";

/// Default prefix marking system-generated (virtual) unit references.
pub const DEFAULT_VIRTUAL_PREFIX: &str = "virtual:";

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Content configuration (paths are relative strings from TOML).
    content: ContentConfigRaw,
    /// Component configuration (paths are relative strings from TOML).
    components: ComponentsConfigRaw,
    /// Markdown pipeline configuration.
    pub markdown: MarkdownConfig,

    /// Resolved content configuration (set after loading).
    #[serde(skip)]
    pub content_resolved: ContentConfig,
    /// Resolved component configuration (set after loading).
    #[serde(skip)]
    pub components_resolved: ComponentsConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Raw content configuration as parsed from TOML (paths as strings).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ContentConfigRaw {
    root: Option<String>,
    index: Option<String>,
    flatten_sequences: Option<bool>,
}

/// Resolved content configuration with absolute paths.
#[derive(Clone, Debug)]
pub struct ContentConfig {
    /// Directory holding entries and fragment files.
    pub root: PathBuf,
    /// Basename mapped to the empty (root) site path, without extension.
    pub index: String,
    /// Splice nested sequences into their parent during traversal.
    pub flatten_sequences: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("content"),
            index: "index".to_owned(),
            flatten_sequences: false,
        }
    }
}

/// Raw component configuration as parsed from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ComponentsConfigRaw {
    root: Option<String>,
    reference_field: Option<String>,
    virtual_prefix: Option<String>,
}

/// Resolved component configuration.
#[derive(Clone, Debug)]
pub struct ComponentsConfig {
    /// Directory holding renderer shape descriptors.
    pub root: PathBuf,
    /// Record field naming the renderer that consumes a record.
    pub reference_field: String,
    /// Reserved prefix for system-generated unit references.
    pub virtual_prefix: String,
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("components"),
            reference_field: DEFAULT_REFERENCE_FIELD.to_owned(),
            virtual_prefix: DEFAULT_VIRTUAL_PREFIX.to_owned(),
        }
    }
}

/// Markdown pipeline configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MarkdownConfig {
    /// Enabled parser extensions (e.g. "tables", "footnotes").
    pub extensions: Vec<String>,
    /// Extract the first level-1 heading as `title` metadata.
    pub extract_title: bool,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            extensions: vec![
                "tables".to_owned(),
                "strikethrough".to_owned(),
                "tasklists".to_owned(),
            ],
            extract_title: true,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`content.root`").
        field: String,
        /// Error message (e.g., "${`CONTENT_DIR`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `loom.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading and path resolution, allowing CLI
    /// arguments to take precedence over config file values.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist or parsing fails.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }

        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(root) = &settings.content_root {
            self.content_resolved.root.clone_from(root);
        }
        if let Some(root) = &settings.components_root {
            self.components_resolved.root.clone_from(root);
        }
        if let Some(flatten) = settings.flatten_sequences {
            self.content_resolved.flatten_sequences = flatten;
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    #[must_use]
    pub fn default_with_base(base: &Path) -> Self {
        Self {
            content: ContentConfigRaw::default(),
            components: ComponentsConfigRaw::default(),
            markdown: MarkdownConfig::default(),
            content_resolved: ContentConfig {
                root: base.join("content"),
                ..ContentConfig::default()
            },
            components_resolved: ComponentsConfig {
                root: base.join("components"),
                ..ComponentsConfig::default()
            },
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Called automatically after loading from file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let index = &self.content_resolved.index;
        require_non_empty(index, "content.index")?;
        if index.contains('/') || index.starts_with('_') || index.starts_with('.') {
            return Err(ConfigError::Validation(format!(
                "content.index must be a plain file basename, got {index:?}"
            )));
        }

        require_non_empty(
            &self.components_resolved.reference_field,
            "components.reference_field",
        )?;
        require_non_empty(
            &self.components_resolved.virtual_prefix,
            "components.virtual_prefix",
        )?;

        Ok(())
    }

    /// Expand environment variable references in path values.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref root) = self.content.root {
            self.content.root = Some(expand::expand_env(root, "content.root")?);
        }
        if let Some(ref root) = self.components.root {
            self.components.root = Some(expand::expand_env(root, "components.root")?);
        }
        Ok(())
    }

    /// Resolve relative paths to absolute paths based on config directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        let resolve = |path: Option<&str>, default: &str| config_dir.join(path.unwrap_or(default));

        let content_defaults = ContentConfig::default();
        self.content_resolved = ContentConfig {
            root: resolve(self.content.root.as_deref(), "content"),
            index: self.content.index.clone().unwrap_or(content_defaults.index),
            flatten_sequences: self
                .content
                .flatten_sequences
                .unwrap_or(content_defaults.flatten_sequences),
        };

        let component_defaults = ComponentsConfig::default();
        self.components_resolved = ComponentsConfig {
            root: resolve(self.components.root.as_deref(), "components"),
            reference_field: self
                .components
                .reference_field
                .clone()
                .unwrap_or(component_defaults.reference_field),
            virtual_prefix: self
                .components
                .virtual_prefix
                .clone()
                .unwrap_or(component_defaults.virtual_prefix),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default_with_base(Path::new("/test"));
        assert_eq!(config.content_resolved.root, PathBuf::from("/test/content"));
        assert_eq!(config.content_resolved.index, "index");
        assert!(!config.content_resolved.flatten_sequences);
        assert_eq!(
            config.components_resolved.root,
            PathBuf::from("/test/components")
        );
        assert_eq!(config.components_resolved.reference_field, "component");
        assert_eq!(config.components_resolved.virtual_prefix, "virtual:");
        assert!(config.markdown.extract_title);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.markdown, MarkdownConfig::default());
    }

    #[test]
    fn test_parse_markdown_config() {
        let toml = r#"
[markdown]
extensions = ["footnotes"]
extract_title = false
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.markdown.extensions, vec!["footnotes".to_owned()]);
        assert!(!config.markdown.extract_title);
    }

    #[test]
    fn test_resolve_paths() {
        let toml = r#"
[content]
root = "site/pages"
index = "home"
flatten_sequences = true

[components]
root = "ui"
reference_field = "block"
virtual_prefix = "inline:"
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.resolve_paths(Path::new("/project"));

        assert_eq!(
            config.content_resolved.root,
            PathBuf::from("/project/site/pages")
        );
        assert_eq!(config.content_resolved.index, "home");
        assert!(config.content_resolved.flatten_sequences);
        assert_eq!(config.components_resolved.root, PathBuf::from("/project/ui"));
        assert_eq!(config.components_resolved.reference_field, "block");
        assert_eq!(config.components_resolved.virtual_prefix, "inline:");
    }

    #[test]
    fn test_validate_rejects_nested_index() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.content_resolved.index = "pages/index".to_owned();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("content.index"));
    }

    #[test]
    fn test_validate_rejects_fragment_index() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.content_resolved.index = "_index".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.components_resolved.virtual_prefix = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("components.virtual_prefix"));
    }

    #[test]
    fn test_apply_cli_settings() {
        let mut config = Config::default_with_base(Path::new("/test"));
        let overrides = CliSettings {
            content_root: Some(PathBuf::from("/custom/content")),
            flatten_sequences: Some(true),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(
            config.content_resolved.root,
            PathBuf::from("/custom/content")
        );
        assert!(config.content_resolved.flatten_sequences);
        assert_eq!(
            config.components_resolved.root,
            PathBuf::from("/test/components")
        );
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let result = Config::load(Some(Path::new("/nonexistent/loom.toml")), None);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_from_file_resolves_relative_to_config_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("loom.toml");
        std::fs::write(&config_path, "[content]\nroot = \"pages\"\n").unwrap();

        let config = Config::load(Some(&config_path), None).unwrap();

        assert_eq!(config.content_resolved.root, temp_dir.path().join("pages"));
        assert_eq!(
            config.components_resolved.root,
            temp_dir.path().join("components")
        );
        assert_eq!(config.config_path, Some(config_path));
    }

    #[test]
    fn test_load_from_file_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("loom.toml");
        std::fs::write(&config_path, "[content\nroot = ").unwrap();

        let result = Config::load(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
