//! File parsing.
//!
//! Turns one source file into a raw [`Record`], dispatching on extension:
//!
//! | Extension              | Format                                              |
//! |------------------------|-----------------------------------------------------|
//! | `md`, `markdown`       | YAML (`---`) or TOML (`+++`) front matter + body    |
//! | `yaml`, `yml`          | YAML mapping                                        |
//! | `json`                 | JSON object                                         |
//! | `toml`                 | TOML table                                          |
//! | registered extensions  | [`ModuleLoader`] export                             |
//!
//! Front matter keys become top-level keys; the remaining body is stored
//! unparsed under [`BODY_FIELD`].

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::ContentError;
use crate::report::Reporter;
use crate::value::{Record, Value};

/// Built-in extensions in lookup priority order.
pub const BUILTIN_EXTENSIONS: &[&str] = &["md", "markdown", "yaml", "yml", "json", "toml"];

/// Field receiving the body of a front-matter file.
pub const BODY_FIELD: &str = "markdown";

/// Factory invoked with the dependency reporter to produce a module's value.
pub type ModuleFactory = Box<dyn FnOnce(&dyn Reporter) -> Result<Value, ContentError> + Send>;

/// What a loaded module exports.
pub enum ModuleExport {
    /// The export is used as the fragment directly.
    Value(Value),
    /// The export is callable; its return value is used as the fragment.
    Factory(ModuleFactory),
}

/// Loader for executable content modules.
///
/// Registered per extension on a [`FileParser`]. The loader owns whatever
/// mechanism turns a module file into data; the parser only dispatches.
pub trait ModuleLoader: Send + Sync {
    /// Load the module at `path`.
    fn load(&self, path: &Path) -> Result<ModuleExport, ContentError>;
}

/// Extension-dispatching file parser.
#[derive(Clone, Default)]
pub struct FileParser {
    modules: Vec<(String, Arc<dyn ModuleLoader>)>,
}

impl fmt::Debug for FileParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileParser")
            .field("extensions", &self.extensions())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    FrontMatter,
    Yaml,
    Json,
    Toml,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrontMatterFormat {
    Yaml,
    Toml,
}

impl FileParser {
    /// Create a parser recognizing only the built-in formats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module loader for an extension (without leading dot).
    ///
    /// Built-in extensions cannot be overridden; registering one is ignored.
    #[must_use]
    pub fn with_module_loader(
        mut self,
        extension: impl Into<String>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        let extension = extension.into().trim_start_matches('.').to_ascii_lowercase();
        if BUILTIN_EXTENSIONS.contains(&extension.as_str()) {
            tracing::warn!(%extension, "Ignoring module loader for built-in extension");
            return self;
        }
        self.modules.retain(|(ext, _)| *ext != extension);
        self.modules.push((extension, loader));
        self
    }

    /// Recognized extensions in lookup priority order.
    #[must_use]
    pub fn extensions(&self) -> Vec<&str> {
        BUILTIN_EXTENSIONS
            .iter()
            .copied()
            .chain(self.modules.iter().map(|(ext, _)| ext.as_str()))
            .collect()
    }

    /// Whether the file's extension is recognized.
    #[must_use]
    pub fn supports(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.extensions().contains(&ext.as_str()))
    }

    /// Parse a file into a record and report it as a dependency.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFileExtension` for unknown extensions,
    /// `FileNotFound` if the file does not exist and `Parse` if the content
    /// is malformed or its root is not a mapping.
    pub fn parse(&self, path: &Path, reporter: &dyn Reporter) -> Result<Record, ContentError> {
        let extension = extension_of(path)
            .ok_or_else(|| ContentError::UnsupportedFileExtension(path.to_path_buf()))?;

        let record = if let Some(format) = builtin_format(&extension) {
            let text = fs::read_to_string(path)
                .map_err(|e| ContentError::io(path.to_path_buf(), e))?;
            parse_text(format, &text, path)?
        } else if let Some((_, loader)) = self.modules.iter().find(|(ext, _)| *ext == extension) {
            if !path.is_file() {
                return Err(ContentError::FileNotFound(path.to_path_buf()));
            }
            let value = match loader.load(path)? {
                ModuleExport::Value(value) => value,
                ModuleExport::Factory(factory) => factory(reporter)?,
            };
            into_root(value, path)?
        } else {
            return Err(ContentError::UnsupportedFileExtension(path.to_path_buf()));
        };

        reporter.file(path);
        Ok(record)
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn builtin_format(extension: &str) -> Option<Format> {
    match extension {
        "md" | "markdown" => Some(Format::FrontMatter),
        "yaml" | "yml" => Some(Format::Yaml),
        "json" => Some(Format::Json),
        "toml" => Some(Format::Toml),
        _ => None,
    }
}

fn parse_text(format: Format, text: &str, path: &Path) -> Result<Record, ContentError> {
    match format {
        Format::FrontMatter => parse_front_matter_file(text, path),
        Format::Yaml => parse_yaml(text, path),
        Format::Json => {
            let json: serde_json::Value =
                serde_json::from_str(text).map_err(|e| ContentError::parse(path, e))?;
            into_root(Value::from(json), path)
        }
        Format::Toml => {
            let table: toml::Table =
                toml::from_str(text).map_err(|e| ContentError::parse(path, e))?;
            into_root(Value::from(toml::Value::Table(table)), path)
        }
    }
}

fn parse_yaml(text: &str, path: &Path) -> Result<Record, ContentError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| ContentError::parse(path, e))?;
    let value = Value::from_yaml(yaml).map_err(|e| ContentError::parse(path, e))?;
    into_root(value, path)
}

fn parse_front_matter_file(text: &str, path: &Path) -> Result<Record, ContentError> {
    let (mut record, body) = match split_front_matter(text) {
        Some((FrontMatterFormat::Yaml, meta, body)) => (parse_yaml(meta, path)?, body),
        Some((FrontMatterFormat::Toml, meta, body)) => {
            let table: toml::Table =
                toml::from_str(meta).map_err(|e| ContentError::parse(path, e))?;
            (into_root(Value::from(toml::Value::Table(table)), path)?, body)
        }
        None => (Record::new(), text),
    };

    if record.contains_key(BODY_FIELD) {
        tracing::warn!(
            path = %path.display(),
            field = BODY_FIELD,
            "Front matter key shadowed by document body"
        );
    }
    record.insert(BODY_FIELD.to_owned(), Value::String(body.to_owned()));
    Ok(record)
}

/// Split text into front matter format, metadata text and body.
///
/// The opening and closing delimiters must each sit on their own line.
fn split_front_matter(text: &str) -> Option<(FrontMatterFormat, &str, &str)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let (format, delimiter) = if text.starts_with("---") {
        (FrontMatterFormat::Yaml, "---")
    } else if text.starts_with("+++") {
        (FrontMatterFormat::Toml, "+++")
    } else {
        return None;
    };

    let first_line_end = text.find('\n')?;
    if text[..first_line_end].trim_end() != delimiter {
        return None;
    }

    let rest = &text[first_line_end + 1..];
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == delimiter {
            let meta = &rest[..offset];
            let body = rest[offset + line.len()..].trim_start_matches(['\n', '\r']);
            return Some((format, meta, body));
        }
        offset += line.len();
    }
    None
}

fn into_root(value: Value, path: &Path) -> Result<Record, ContentError> {
    match value {
        Value::Record(record) => Ok(record),
        Value::Null => Ok(Record::new()),
        other => Err(ContentError::parse(
            path,
            format!("expected a mapping at the root, found {}", other.kind()),
        )),
    }
}
