//! Markup pipeline for embedded markdown.
//!
//! The [`MarkupPipeline`] trait is the seam between the virtual unit pass and
//! whatever turns raw text into markup. [`MarkdownPipeline`] is the default,
//! built on pulldown-cmark.

use std::collections::HashMap;

use pulldown_cmark::{CowStr, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

use crate::error::ContentError;
use crate::value::{Record, Value};

/// Extension names accepted in configuration and per-unit options.
pub const EXTENSION_NAMES: &[&str] = &[
    "tables",
    "footnotes",
    "strikethrough",
    "tasklists",
    "smart-punctuation",
    "heading-attributes",
    "gfm",
];

/// Output of a markup pipeline run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rendered {
    /// Rendered markup.
    pub markup: String,
    /// Extracted metadata, merged onto the unit's record.
    pub metadata: Record,
}

/// Converts raw embedded text into markup plus metadata.
pub trait MarkupPipeline: Send + Sync {
    /// Render `raw` with the unit's `options`.
    fn render(&self, raw: &str, options: &Value) -> Result<Rendered, ContentError>;
}

/// Default markdown pipeline.
///
/// Produces HTML with heading ids and extracts a `headings` list, plus a
/// `title` from the first level-1 heading when enabled.
///
/// Per-unit options:
/// - `extensions`: list of extension names replacing the configured list
/// - `title`: enable or disable title extraction
#[derive(Clone, Debug)]
pub struct MarkdownPipeline {
    options: Options,
    extract_title: bool,
}

impl Default for MarkdownPipeline {
    fn default() -> Self {
        Self {
            options: Options::ENABLE_TABLES
                | Options::ENABLE_STRIKETHROUGH
                | Options::ENABLE_TASKLISTS,
            extract_title: true,
        }
    }
}

impl MarkdownPipeline {
    /// Create a pipeline with the given extensions.
    ///
    /// # Errors
    ///
    /// Returns `Markup` if an extension name is unknown.
    pub fn new<S: AsRef<str>>(extensions: &[S], extract_title: bool) -> Result<Self, ContentError> {
        Ok(Self {
            options: parse_extensions(extensions)?,
            extract_title,
        })
    }
}

fn parse_extensions<S: AsRef<str>>(names: &[S]) -> Result<Options, ContentError> {
    let mut options = Options::empty();
    for name in names {
        options |= match name.as_ref() {
            "tables" => Options::ENABLE_TABLES,
            "footnotes" => Options::ENABLE_FOOTNOTES,
            "strikethrough" => Options::ENABLE_STRIKETHROUGH,
            "tasklists" => Options::ENABLE_TASKLISTS,
            "smart-punctuation" => Options::ENABLE_SMART_PUNCTUATION,
            "heading-attributes" => Options::ENABLE_HEADING_ATTRIBUTES,
            "gfm" => Options::ENABLE_GFM,
            other => {
                return Err(ContentError::Markup(format!(
                    "unknown markdown extension '{other}' (expected one of: {})",
                    EXTENSION_NAMES.join(", ")
                )));
            }
        };
    }
    Ok(options)
}

impl MarkupPipeline for MarkdownPipeline {
    fn render(&self, raw: &str, options: &Value) -> Result<Rendered, ContentError> {
        let (parser_options, extract_title) = self.unit_settings(options)?;

        let mut events: Vec<Event<'_>> = Vec::new();
        let mut headings = HeadingCollector::default();

        for event in Parser::new_ext(raw, parser_options) {
            match &event {
                Event::Start(Tag::Heading { level, id, .. }) => {
                    headings.start(events.len(), *level, id.as_deref());
                }
                Event::Text(text) | Event::Code(text) => headings.push_text(text),
                Event::End(TagEnd::Heading(_)) => {
                    if let Some((start, id)) = headings.finish()
                        && let Some(Event::Start(Tag::Heading { id: slot, .. })) =
                            events.get_mut(start)
                    {
                        *slot = Some(CowStr::from(id));
                    }
                }
                _ => {}
            }
            events.push(event);
        }

        let mut markup = String::with_capacity(raw.len() * 3 / 2);
        pulldown_cmark::html::push_html(&mut markup, events.into_iter());

        let mut metadata = Record::new();
        if extract_title && let Some(title) = headings.title() {
            metadata.insert("title".to_owned(), Value::String(title));
        }
        metadata.insert("headings".to_owned(), headings.into_value());

        Ok(Rendered { markup, metadata })
    }
}

impl MarkdownPipeline {
    fn unit_settings(&self, options: &Value) -> Result<(Options, bool), ContentError> {
        let Some(options) = options.as_record() else {
            return Ok((self.options, self.extract_title));
        };

        let parser_options = match options.get("extensions") {
            None | Some(Value::Null) => self.options,
            Some(Value::Sequence(items)) => {
                let names = items
                    .iter()
                    .map(|item| {
                        item.as_str().ok_or_else(|| {
                            ContentError::Markup(format!(
                                "extension names must be strings, found {}",
                                item.kind()
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                parse_extensions(&names)?
            }
            Some(other) => {
                return Err(ContentError::Markup(format!(
                    "'extensions' option must be a list, found {}",
                    other.kind()
                )));
            }
        };

        let extract_title = match options.get("title") {
            None | Some(Value::Null) => self.extract_title,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(ContentError::Markup(format!(
                    "'title' option must be a boolean, found {}",
                    other.kind()
                )));
            }
        };

        Ok((parser_options, extract_title))
    }
}

struct Heading {
    level: u8,
    text: String,
    id: String,
}

#[derive(Default)]
struct HeadingCollector {
    /// Event index, level and explicit id of the open heading.
    current: Option<(usize, u8, Option<String>)>,
    text: String,
    headings: Vec<Heading>,
    id_counts: HashMap<String, usize>,
}

impl HeadingCollector {
    fn start(&mut self, index: usize, level: HeadingLevel, explicit_id: Option<&str>) {
        self.current = Some((index, heading_level_to_num(level), explicit_id.map(str::to_owned)));
        self.text.clear();
    }

    fn push_text(&mut self, text: &str) {
        if self.current.is_some() {
            self.text.push_str(text);
        }
    }

    /// Close the open heading, returning its start event index and id.
    fn finish(&mut self) -> Option<(usize, String)> {
        let (index, level, explicit_id) = self.current.take()?;
        let text = std::mem::take(&mut self.text).trim().to_owned();
        let id = match explicit_id {
            Some(id) => {
                *self.id_counts.entry(id.clone()).or_default() += 1;
                id
            }
            None => self.generate_id(&text),
        };
        self.headings.push(Heading {
            level,
            text,
            id: id.clone(),
        });
        Some((index, id))
    }

    fn generate_id(&mut self, text: &str) -> String {
        let mut base_id = slugify(text);
        if base_id.is_empty() {
            base_id = "heading".to_owned();
        }
        let count = self.id_counts.entry(base_id.clone()).or_default();
        let id = match *count {
            0 => base_id,
            n => format!("{base_id}-{n}"),
        };
        *count += 1;
        id
    }

    fn title(&self) -> Option<String> {
        self.headings
            .iter()
            .find(|h| h.level == 1)
            .map(|h| h.text.clone())
    }

    fn into_value(self) -> Value {
        Value::Sequence(
            self.headings
                .into_iter()
                .map(|h| {
                    let mut record = Record::new();
                    record.insert("level".to_owned(), Value::Integer(i64::from(h.level)));
                    record.insert("text".to_owned(), Value::String(h.text));
                    record.insert("id".to_owned(), Value::String(h.id));
                    Value::Record(record)
                })
                .collect(),
        )
    }
}

fn heading_level_to_num(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Convert text to a URL-safe slug.
///
/// Lowercases ASCII alphanumerics, collapses whitespace, dashes and
/// underscores into single dashes and drops everything else.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut result = String::new();
    let mut last_was_dash = true;

    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() {
            result.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && (c.is_whitespace() || c == '-' || c == '_') {
            result.push('-');
            last_was_dash = true;
        }
    }

    if result.ends_with('-') {
        result.pop();
    }

    result
}
