//! Declarative unit shapes.
//!
//! A shape describes the fields a renderer accepts. Shapes are plain data,
//! deserialized from descriptor files or registered in code, and are applied
//! to a unit record to validate it and fill in defaults.
//!
//! # Descriptor format
//!
//! ```yaml
//! unknown: keep        # keep | strip | reject
//! fields:
//!   title:
//!     type: string
//!     required: true
//!   body:
//!     type: markdown
//!     inherit: [lang]
//!     options: { title: false }
//!   tags:
//!     type: list
//!     items: { type: string }
//!     default: []
//!   size:
//!     type: enum
//!     values: [small, large]
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::error::Violation;
use crate::validator::ValidationContext;
use crate::value::{Record, Value};
use crate::virtual_unit::virtual_record;

/// Handling of record fields not declared in a shape.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFields {
    /// Pass undeclared fields through.
    #[default]
    Keep,
    /// Drop undeclared fields.
    Strip,
    /// Report undeclared fields as violations.
    Reject,
}

/// Declared type of a field.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Date,
    /// Embedded markdown, turned into a virtual unit record.
    Markdown,
    List,
    Record,
    Enum,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Markdown => "markdown",
            Self::List => "list",
            Self::Record => "record",
            Self::Enum => "enum",
        })
    }
}

/// Shape of a single field.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FieldShape {
    /// Declared type.
    #[serde(rename = "type")]
    pub kind: FieldType,
    /// Whether the field must be present (and non-null).
    pub required: bool,
    /// Value used when the field is absent.
    pub default: Option<serde_json::Value>,
    /// Shape of each element of a `list` field.
    pub items: Option<Box<FieldShape>>,
    /// Nested fields of a `record` field. `None` accepts any record.
    pub fields: Option<BTreeMap<String, FieldShape>>,
    /// Handling of undeclared nested fields of a `record` field.
    pub unknown: UnknownFields,
    /// Allowed values of an `enum` field.
    pub values: Vec<String>,
    /// Keys of the embedding record copied into a `markdown` unit's parent.
    pub inherit: Vec<String>,
    /// Markup options of a `markdown` field.
    pub options: Option<serde_json::Value>,
}

/// Shape of a unit record.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Shape {
    /// Declared fields.
    pub fields: BTreeMap<String, FieldShape>,
    /// Handling of undeclared fields.
    pub unknown: UnknownFields,
}

impl Shape {
    /// Validate `record` and return the transformed record.
    ///
    /// The unit reference field is always kept, whatever the unknown-field
    /// policy says.
    ///
    /// # Errors
    ///
    /// Returns every violation found; the record is not returned in that case.
    pub fn apply(&self, mut record: Record, context: &ValidationContext) -> Result<Record, Vec<Violation>> {
        let reference = record.remove(&context.reference_field);

        let mut violations = Vec::new();
        let mut output = apply_fields(
            &self.fields,
            self.unknown,
            &record,
            "",
            context,
            &mut violations,
        );

        if !violations.is_empty() {
            return Err(violations);
        }
        if let Some(reference) = reference {
            output.insert(context.reference_field.clone(), reference);
        }
        Ok(output)
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}.{name}")
    }
}

fn apply_fields(
    fields: &BTreeMap<String, FieldShape>,
    unknown: UnknownFields,
    source: &Record,
    prefix: &str,
    context: &ValidationContext,
    violations: &mut Vec<Violation>,
) -> Record {
    let mut output = Record::new();

    for (name, shape) in fields {
        let path = join_path(prefix, name);
        match source.get(name) {
            None | Some(Value::Null) => {
                if let Some(default) = &shape.default {
                    output.insert(name.clone(), Value::from(default.clone()));
                } else if shape.required {
                    violations.push(Violation {
                        field: path,
                        message: "required field is missing".to_owned(),
                    });
                } else if let Some(null) = source.get(name) {
                    output.insert(name.clone(), null.clone());
                }
            }
            Some(value) => {
                let value = apply_field(shape, value.clone(), source, &path, context, violations);
                output.insert(name.clone(), value);
            }
        }
    }

    for (key, value) in source {
        if fields.contains_key(key) {
            continue;
        }
        match unknown {
            UnknownFields::Keep => {
                output.insert(key.clone(), value.clone());
            }
            UnknownFields::Strip => {}
            UnknownFields::Reject => violations.push(Violation {
                field: join_path(prefix, key),
                message: "unknown field".to_owned(),
            }),
        }
    }

    output
}

fn apply_field(
    shape: &FieldShape,
    value: Value,
    embedding: &Record,
    path: &str,
    context: &ValidationContext,
    violations: &mut Vec<Violation>,
) -> Value {
    match (shape.kind, value) {
        (FieldType::Any, value)
        | (FieldType::String, value @ Value::String(_))
        | (FieldType::Integer, value @ Value::Integer(_))
        | (FieldType::Number, value @ (Value::Integer(_) | Value::Float(_)))
        | (FieldType::Boolean, value @ Value::Bool(_))
        | (FieldType::Date, value @ Value::Date(_)) => value,

        (FieldType::Date, Value::String(text)) => match text.parse::<toml::value::Datetime>() {
            Ok(date) => Value::Date(date),
            Err(_) => {
                violations.push(Violation {
                    field: path.to_owned(),
                    message: format!("'{text}' is not a valid date"),
                });
                Value::String(text)
            }
        },

        (FieldType::Markdown, Value::String(raw)) => {
            let options = shape
                .options
                .clone()
                .map_or_else(|| Value::Record(Record::new()), Value::from);
            let parent = shape
                .inherit
                .iter()
                .filter_map(|key| Some((key.clone(), embedding.get(key)?.clone())))
                .collect();
            Value::Record(virtual_record(raw, options, parent, context))
        }
        // Already a unit record (e.g. produced by a fragment).
        (FieldType::Markdown, Value::Record(record))
            if record
                .get(&context.reference_field)
                .and_then(Value::as_str)
                .is_some() =>
        {
            Value::Record(record)
        }

        (FieldType::List, Value::Sequence(items)) => match &shape.items {
            Some(item_shape) => Value::Sequence(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let item_path = format!("{path}.{i}");
                        if item.is_null() && item_shape.required {
                            violations.push(Violation {
                                field: item_path,
                                message: "required item is null".to_owned(),
                            });
                            return item;
                        }
                        apply_field(item_shape, item, embedding, &item_path, context, violations)
                    })
                    .collect(),
            ),
            None => Value::Sequence(items),
        },

        (FieldType::Record, Value::Record(record)) => match &shape.fields {
            Some(fields) => Value::Record(apply_fields(
                fields,
                shape.unknown,
                &record,
                path,
                context,
                violations,
            )),
            None => Value::Record(record),
        },

        (FieldType::Enum, Value::String(text)) => {
            if !shape.values.iter().any(|allowed| *allowed == text) {
                violations.push(Violation {
                    field: path.to_owned(),
                    message: format!(
                        "'{text}' is not one of: {}",
                        shape.values.join(", ")
                    ),
                });
            }
            Value::String(text)
        }

        (kind, value) => {
            violations.push(Violation {
                field: path.to_owned(),
                message: format!("expected {kind}, found {}", value.kind()),
            });
            value
        }
    }
}
