//! Content loading.
//!
//! [`ContentLoader`] turns a site path into a resolved page: it locates and
//! parses the entry's source file, then runs three full traversal passes in
//! order:
//!
//! 1. fragment resolution
//! 2. validation of referenced units
//! 3. rendering of virtual units
//!
//! Every pass sees the settled output of the previous one. Any error aborts
//! the whole load.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::discovery::{Entry, discover};
use crate::error::ContentError;
use crate::fragment::FragmentResolver;
use crate::markup::{MarkdownPipeline, MarkupPipeline};
use crate::parser::{FileParser, ModuleLoader};
use crate::report::Reporter;
use crate::traverse::{SequenceMode, traverse_record};
use crate::validator::{ShapeValidator, ValidationContext, Validator, is_referenced_unit};
use crate::value::Record;
use crate::virtual_unit::VirtualUnitProcessor;

/// Default index basename.
pub const DEFAULT_INDEX: &str = "index";

/// Loader settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Directory holding entries and fragment files.
    pub content_root: PathBuf,
    /// Directory holding renderer shape descriptors.
    pub components_root: PathBuf,
    /// Basename mapped to the root site path.
    pub index: String,
    /// Record field naming the renderer that consumes a record.
    pub reference_field: String,
    /// Prefix marking system-generated unit references.
    pub virtual_prefix: String,
    /// Sequence handling of every traversal pass.
    pub sequence_mode: SequenceMode,
}

impl LoaderConfig {
    /// Settings with default naming conventions.
    #[must_use]
    pub fn new(content_root: impl Into<PathBuf>, components_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
            components_root: components_root.into(),
            index: DEFAULT_INDEX.to_owned(),
            reference_field: "component".to_owned(),
            virtual_prefix: "virtual:".to_owned(),
            sequence_mode: SequenceMode::Preserve,
        }
    }
}

/// A fully resolved page.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    /// Normalized site path.
    pub path: String,
    /// Source file the page was parsed from.
    pub source: PathBuf,
    /// Page data after all passes.
    pub data: Record,
}

/// Normalize a site path by trimming leading and trailing slashes.
#[must_use]
pub fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// Loads entries below a content root.
///
/// The discovered entry list is kept until [`ContentLoader::refresh`].
pub struct ContentLoader {
    config: LoaderConfig,
    context: ValidationContext,
    parser: FileParser,
    validator: Arc<dyn Validator>,
    markup: Arc<dyn MarkupPipeline>,
    entries: RwLock<Option<Arc<Vec<Entry>>>>,
}

impl fmt::Debug for ContentLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentLoader")
            .field("config", &self.config)
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

impl ContentLoader {
    /// Create a loader with the default validator and markdown pipeline.
    ///
    /// Both roots are made absolute against the current directory.
    #[must_use]
    pub fn new(mut config: LoaderConfig) -> Self {
        config.content_root = absolute(config.content_root);
        config.components_root = absolute(config.components_root);
        let context = ValidationContext {
            reference_field: config.reference_field.clone(),
            virtual_prefix: config.virtual_prefix.clone(),
            components_root: config.components_root.clone(),
        };
        Self {
            config,
            context,
            parser: FileParser::new(),
            validator: Arc::new(ShapeValidator::new()),
            markup: Arc::new(MarkdownPipeline::default()),
            entries: RwLock::new(None),
        }
    }

    /// Replace the validator used by the validation pass.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replace the markup pipeline used by the virtual unit pass.
    #[must_use]
    pub fn with_markup(mut self, markup: Arc<dyn MarkupPipeline>) -> Self {
        self.markup = markup;
        self
    }

    /// Register a module loader for an extension.
    ///
    /// Files with the extension become discoverable entries and resolvable
    /// fragments.
    #[must_use]
    pub fn with_module_loader(
        mut self,
        extension: impl Into<String>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        self.parser = self.parser.with_module_loader(extension, loader);
        self.entries = RwLock::new(None);
        self
    }

    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Absolute content root.
    #[must_use]
    pub fn content_root(&self) -> &Path {
        &self.config.content_root
    }

    #[must_use]
    pub fn parser(&self) -> &FileParser {
        &self.parser
    }

    #[must_use]
    pub fn context(&self) -> &ValidationContext {
        &self.context
    }

    /// Discovered entries, discovering on first use.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn entries(&self) -> Arc<Vec<Entry>> {
        if let Some(entries) = self.entries.read().unwrap().as_ref() {
            return Arc::clone(entries);
        }
        self.refresh()
    }

    /// Re-run discovery and replace the entry list.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn refresh(&self) -> Arc<Vec<Entry>> {
        let entries = Arc::new(discover(
            &self.config.content_root,
            &self.config.index,
            &self.parser.extensions(),
        ));
        tracing::debug!(
            root = %self.config.content_root.display(),
            count = entries.len(),
            "Discovered entries"
        );
        *self.entries.write().unwrap() = Some(Arc::clone(&entries));
        entries
    }

    /// Look up a discovered entry, refreshing once if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` listing the known entries.
    pub fn find_entry(&self, path: &str) -> Result<Entry, ContentError> {
        let path = normalize_path(path);
        let lookup = |entries: &[Entry]| entries.iter().find(|e| e.path == path).cloned();

        if let Some(entry) = lookup(&self.entries()) {
            return Ok(entry);
        }

        tracing::debug!(entry = %path, "Unknown entry, refreshing");
        let entries = self.refresh();
        lookup(&entries).ok_or_else(|| ContentError::EntryNotFound {
            path: path.to_owned(),
            known: entries.iter().map(|e| e.path.clone()).collect(),
        })
    }

    /// Locate the source file of a site path.
    ///
    /// Tries `<root>/<path>.<ext>` then `<root>/<path>/<index>.<ext>` for each
    /// recognized extension in priority order.
    ///
    /// # Errors
    ///
    /// Returns `PageNotFound` if no candidate exists.
    pub fn locate(&self, path: &str) -> Result<PathBuf, ContentError> {
        let path = normalize_path(path);
        let root = &self.config.content_root;
        let index = &self.config.index;

        for extension in self.parser.extensions() {
            let candidates = if path.is_empty() {
                vec![root.join(format!("{index}.{extension}"))]
            } else {
                vec![
                    root.join(format!("{path}.{extension}")),
                    root.join(path).join(format!("{index}.{extension}")),
                ]
            };
            if let Some(found) = candidates.into_iter().find(|c| c.is_file()) {
                return Ok(found);
            }
        }

        Err(ContentError::PageNotFound(path.to_owned()))
    }

    /// Load and fully resolve one entry.
    ///
    /// The entry's discovered source is parsed. If that file has gone away
    /// since discovery, the source is located again.
    /// Every file read and every virtual unit produced is sent to `reporter`.
    ///
    /// # Errors
    ///
    /// Returns the first error of discovery, parsing or any pass.
    pub fn load(&self, path: &str, reporter: &dyn Reporter) -> Result<Page, ContentError> {
        let entry = self.find_entry(path)?;
        let source = if entry.source.is_file() {
            entry.source
        } else {
            self.locate(&entry.path)?
        };
        tracing::debug!(entry = %entry.path, source = %source.display(), "Loading entry");

        let mode = self.config.sequence_mode;
        let record = self.parser.parse(&source, reporter)?;

        let record = FragmentResolver::new(&self.config.content_root, &self.parser, mode)
            .resolve(record, &source, reporter)?;

        let record = traverse_record(
            record,
            mode,
            &|record| is_referenced_unit(record, &self.context),
            &|record| self.validator.validate(record, reporter, &self.context),
        )?;

        let processor = VirtualUnitProcessor::new(self.markup.as_ref(), &self.context);
        let record = traverse_record(
            record,
            mode,
            &|record| processor.matches(record),
            &|record| processor.process(record, reporter),
        )?;

        Ok(Page {
            path: entry.path,
            source,
            data: record,
        })
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::markup::Rendered;
    use crate::parser::ModuleExport;
    use crate::report::Recorder;
    use crate::value::Value;

    static_assertions::assert_impl_all!(ContentLoader: Send, Sync);

    fn write(root: &Path, name: &str, content: &str) {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn record(value: serde_json::Value) -> Record {
        match Value::from(value) {
            Value::Record(record) => record,
            _ => unreachable!(),
        }
    }

    fn loader(temp_dir: &tempfile::TempDir) -> ContentLoader {
        ContentLoader::new(LoaderConfig::new(
            temp_dir.path().join("content"),
            temp_dir.path().join("components"),
        ))
    }

    #[test]
    fn test_load_runs_all_passes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let content = temp_dir.path().join("content");
        let components = temp_dir.path().join("components");
        write(
            &content,
            "index.yaml",
            "title: Home\nblocks:\n  - _: _blocks/article.yaml\n    lang: en\n",
        );
        write(
            &content,
            "_blocks/article.yaml",
            "component: Article\nbody: \"# Welcome\\n\\nHello.\"\n",
        );
        write(
            &components,
            "Article.shape.yaml",
            "fields:\n  body: { type: markdown, inherit: [lang] }\n  lang: { type: string, default: fr }\n",
        );
        let loader = loader(&temp_dir);
        let recorder = Recorder::new();

        let page = loader.load("/", &recorder).unwrap();

        assert_eq!(page.path, "");
        assert_eq!(page.source, content.join("index.yaml"));
        let block = page.data["blocks"].as_sequence().unwrap()[0].as_record().unwrap();
        assert_eq!(block["component"], Value::from("Article"));
        assert_eq!(block["lang"], Value::from("en"));
        let body = block["body"].as_record().unwrap();
        assert!(body["component"].as_str().unwrap().starts_with("virtual:"));
        assert_eq!(body["title"], Value::from("Welcome"));
        assert_eq!(body["lang"], Value::from("en"));
        assert!(!body.contains_key("markdown"));
        assert!(!body.contains_key("parent"));

        assert_eq!(
            recorder.unique_files().into_iter().collect::<Vec<_>>(),
            vec![
                components.join("Article.shape.yaml"),
                content.join("_blocks/article.yaml"),
                content.join("index.yaml"),
            ]
        );
        assert_eq!(recorder.unit_ids().len(), 1);
    }

    #[test]
    fn test_identical_embedded_content_shares_unit_id() {
        let temp_dir = tempfile::tempdir().unwrap();
        let content = temp_dir.path().join("content");
        write(
            &content,
            "index.yaml",
            "a: { component: Note, text: Same }\nb: { component: Note, text: Same }\n",
        );
        write(
            &temp_dir.path().join("components"),
            "Note.shape.yaml",
            "fields:\n  text: { type: markdown }\n",
        );
        let recorder = Recorder::new();

        let page = loader(&temp_dir).load("", &recorder).unwrap();

        let reference = |key: &str| {
            page.data[key].as_record().unwrap()["text"].as_record().unwrap()["component"].clone()
        };
        assert_eq!(reference("a"), reference("b"));
        let ids = recorder.unit_ids();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
    }

    #[test]
    fn test_unknown_entry_lists_known_entries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let content = temp_dir.path().join("content");
        write(&content, "index.md", "# Home\n");
        write(&content, "guide.yaml", "title: Guide\n");

        let err = loader(&temp_dir).load("missing", &Recorder::new()).unwrap_err();

        let ContentError::EntryNotFound { path, known } = &err else {
            panic!("expected entry-not-found, got {err}");
        };
        assert_eq!(path, "missing");
        assert_eq!(known, &vec![String::new(), "guide".to_owned()]);
        assert!(err.to_string().contains("Known entries: /, /guide"));
    }

    #[test]
    fn test_new_entry_found_after_refresh_on_miss() {
        let temp_dir = tempfile::tempdir().unwrap();
        let content = temp_dir.path().join("content");
        write(&content, "index.md", "# Home\n");
        let loader = loader(&temp_dir);
        assert_eq!(loader.entries().len(), 1);

        write(&content, "late.yaml", "title: Late\n");
        let page = loader.load("late/", &Recorder::new()).unwrap();

        assert_eq!(page.data, record(json!({"title": "Late"})));
        assert_eq!(loader.entries().len(), 2);
    }

    #[test]
    fn test_every_discovered_entry_loads() {
        let temp_dir = tempfile::tempdir().unwrap();
        let content = temp_dir.path().join("content");
        write(&content, "index.md", "---\ntitle: Home\n---\nBody\n");
        write(&content, "guide.yaml", "title: Guide\n");
        write(&content, "docs/index.toml", "title = \"Docs\"\n");
        write(&content, "docs/setup.json", r#"{"title": "Setup"}"#);
        write(&content, "docs/setup.md", "Shadowed\n");
        write(&content, "_partial.yaml", "ignored: true\n");
        write(&content, "Notes.MD", "# Notes\n");
        write(&content, "faq.md", "# Direct\n");
        write(&content, "faq/index.md", "# Index\n");
        let loader = loader(&temp_dir);

        let entries = loader.entries();
        assert_eq!(entries.len(), 6);
        for entry in entries.iter() {
            let page = loader.load(&entry.path, &Recorder::new()).unwrap();
            assert_eq!(page.source, entry.source, "{}", entry.path);
        }
        assert_eq!(loader.find_entry("faq").unwrap().source, content.join("faq.md"));
    }

    #[test]
    fn test_deleted_source_is_page_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let content = temp_dir.path().join("content");
        write(&content, "gone.yaml", "a: 1\n");
        let loader = loader(&temp_dir);
        loader.entries();

        fs::remove_file(content.join("gone.yaml")).unwrap();
        let err = loader.locate("gone").unwrap_err();

        assert!(matches!(err, ContentError::PageNotFound(p) if p == "gone"));
    }

    #[test]
    fn test_validation_failure_aborts_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(
            &temp_dir.path().join("content"),
            "index.yaml",
            "hero: { component: Hero }\n",
        );
        write(
            &temp_dir.path().join("components"),
            "Hero.shape.yaml",
            "fields:\n  title: { type: string, required: true }\n",
        );

        let err = loader(&temp_dir).load("", &Recorder::new()).unwrap_err();

        assert!(err.to_string().contains("Validation failed for component 'Hero'"));
    }

    struct UppercaseValidator;

    impl Validator for UppercaseValidator {
        fn validate(
            &self,
            mut record: Record,
            _reporter: &dyn Reporter,
            context: &ValidationContext,
        ) -> Result<Record, ContentError> {
            let name = context
                .referenced_component(&record)
                .unwrap_or_default()
                .to_uppercase();
            record.insert("checked".to_owned(), Value::String(name));
            Ok(record)
        }
    }

    #[test]
    fn test_validator_override() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(
            &temp_dir.path().join("content"),
            "index.yaml",
            "hero: { component: Hero }\nnote: { component: \"virtual:abc\", markdown: x }\n",
        );

        let page = loader(&temp_dir)
            .with_validator(Arc::new(UppercaseValidator))
            .load("", &Recorder::new())
            .unwrap();

        assert_eq!(page.data["hero"].as_record().unwrap()["checked"], Value::from("HERO"));
        assert!(!page.data["note"].as_record().unwrap().contains_key("checked"));
    }

    struct CountingMarkup(AtomicUsize);

    impl MarkupPipeline for CountingMarkup {
        fn render(&self, raw: &str, _options: &Value) -> Result<Rendered, ContentError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Rendered {
                markup: raw.to_uppercase(),
                metadata: Record::new(),
            })
        }
    }

    #[test]
    fn test_markup_override() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(
            &temp_dir.path().join("content"),
            "index.yaml",
            "note: { component: \"virtual:abc\", markdown: shout }\n",
        );
        let markup = Arc::new(CountingMarkup(AtomicUsize::new(0)));
        let recorder = Recorder::new();

        let page = loader(&temp_dir)
            .with_markup(Arc::clone(&markup) as Arc<dyn MarkupPipeline>)
            .load("", &recorder)
            .unwrap();

        assert_eq!(markup.0.load(Ordering::SeqCst), 1);
        assert_eq!(page.data["note"], Value::from(json!({"component": "virtual:abc"})));
        assert_eq!(recorder.unit_ids(), vec!["abc".to_owned()]);
    }

    struct Generated;

    impl ModuleLoader for Generated {
        fn load(&self, path: &Path) -> Result<ModuleExport, ContentError> {
            let stem = path.file_stem().unwrap_or_default().to_string_lossy().into_owned();
            Ok(ModuleExport::Value(Value::from(json!({ "generated": stem }))))
        }
    }

    #[test]
    fn test_module_loader_extension_is_discoverable() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(&temp_dir.path().join("content"), "feed.gen", "");
        let loader = loader(&temp_dir).with_module_loader("gen", Arc::new(Generated));

        let page = loader.load("feed", &Recorder::new()).unwrap();

        assert_eq!(page.data, record(json!({"generated": "feed"})));
    }

    #[test]
    fn test_flatten_sequences_mode() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(
            &temp_dir.path().join("content"),
            "index.yaml",
            "items: [[1, 2], [3]]\n",
        );
        let mut config = LoaderConfig::new(
            temp_dir.path().join("content"),
            temp_dir.path().join("components"),
        );
        config.sequence_mode = SequenceMode::FlattenOne;

        let page = ContentLoader::new(config).load("", &Recorder::new()).unwrap();

        assert_eq!(page.data, record(json!({"items": [1, 2, 3]})));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/guide/"), "guide");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path("a/b"), "a/b");
    }
}
