//! Virtual units: content-addressed units rendered from embedded markdown.
//!
//! A virtual unit record carries a reference of the form
//! `<virtual_prefix><id>`, where the id is derived from the raw text and the
//! rendering options alone. Identical embedded content anywhere in a site
//! therefore maps to one id.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ContentError;
use crate::markup::MarkupPipeline;
use crate::parser::BODY_FIELD;
use crate::report::Reporter;
use crate::validator::ValidationContext;
use crate::value::{Record, Value};

/// Field holding the markup options of a virtual unit.
pub const OPTIONS_FIELD: &str = "options";

/// Field holding properties inherited from the embedding record.
pub const PARENT_FIELD: &str = "parent";

/// Number of digest bytes kept in a unit id.
const ID_BYTES: usize = 16;

/// A rendered virtual unit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VirtualUnit {
    /// Content-addressed id (without prefix).
    pub id: String,
    /// Raw embedded text the unit was rendered from.
    pub source: String,
    /// Options passed to the markup pipeline.
    pub options: Value,
    /// Rendered markup.
    pub markup: String,
    /// Finished unit record as it appears in the resolved page.
    pub data: Record,
}

/// Compute the id of a virtual unit.
///
/// The id is the first 16 bytes of a SHA-256 digest over the raw text length,
/// the raw text and the canonical JSON form of the options, hex-encoded.
#[must_use]
pub fn unit_id(raw: &str, options: &Value) -> String {
    let options_json = serde_json::to_string(options).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(raw.len().to_string().as_bytes());
    hasher.update(b":");
    hasher.update(raw.as_bytes());
    hasher.update(b":");
    hasher.update(options_json.as_bytes());
    let digest = hasher.finalize();

    hex::encode(&digest[..ID_BYTES])
}

/// Build the record that stands in for embedded markdown until the virtual
/// unit pass renders it.
#[must_use]
pub fn virtual_record(
    raw: String,
    options: Value,
    parent: Record,
    context: &ValidationContext,
) -> Record {
    let id = unit_id(&raw, &options);
    let mut record = Record::new();
    record.insert(
        context.reference_field.clone(),
        Value::String(format!("{}{id}", context.virtual_prefix)),
    );
    record.insert(BODY_FIELD.to_owned(), Value::String(raw));
    record.insert(OPTIONS_FIELD.to_owned(), options);
    if !parent.is_empty() {
        record.insert(PARENT_FIELD.to_owned(), Value::Record(parent));
    }
    record
}

/// Renders virtual unit records and reports the resulting units.
pub struct VirtualUnitProcessor<'a> {
    pipeline: &'a dyn MarkupPipeline,
    context: &'a ValidationContext,
}

impl<'a> VirtualUnitProcessor<'a> {
    #[must_use]
    pub fn new(pipeline: &'a dyn MarkupPipeline, context: &'a ValidationContext) -> Self {
        Self { pipeline, context }
    }

    /// Whether `record` references a virtual unit.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.virtual_id(record).is_some()
    }

    fn virtual_id<'r>(&self, record: &'r Record) -> Option<&'r str> {
        record
            .get(&self.context.reference_field)?
            .as_str()?
            .strip_prefix(self.context.virtual_prefix.as_str())
    }

    /// Render a virtual unit record.
    ///
    /// The raw markdown field is replaced by the pipeline's metadata and the
    /// `parent` properties; the finished unit is sent to `reporter`.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the record has no string markdown
    /// field, or the pipeline's error.
    pub fn process(&self, mut record: Record, reporter: &dyn Reporter) -> Result<Record, ContentError> {
        let id = self
            .virtual_id(&record)
            .ok_or_else(|| {
                ContentError::InvariantViolation(
                    "virtual unit pass received a non-virtual record".to_owned(),
                )
            })?
            .to_owned();

        let Some(Value::String(raw)) = record.remove(BODY_FIELD) else {
            return Err(ContentError::InvariantViolation(format!(
                "virtual unit '{id}' has no string '{BODY_FIELD}' field"
            )));
        };

        let options = record
            .get(OPTIONS_FIELD)
            .cloned()
            .unwrap_or_else(|| Value::Record(Record::new()));
        let rendered = self.pipeline.render(&raw, &options)?;

        record.extend(rendered.metadata);
        match record.remove(PARENT_FIELD) {
            Some(Value::Record(parent)) => record.extend(parent),
            Some(other) => {
                tracing::warn!(unit = %id, kind = other.kind(), "Ignoring non-record parent");
            }
            None => {}
        }

        tracing::debug!(unit = %id, "Rendered virtual unit");
        reporter.virtual_unit(VirtualUnit {
            id,
            source: raw,
            options,
            markup: rendered.markup,
            data: record.clone(),
        });

        Ok(record)
    }
}
