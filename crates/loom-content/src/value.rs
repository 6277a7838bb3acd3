//! Content value model.
//!
//! Every parsed file, regardless of its on-disk format, is normalized into a
//! [`Value`] tree whose root is a [`Record`]. The model distinguishes records,
//! sequences, scalars and opaque dates; traversal passes only ever descend into
//! records and sequences.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use toml::value::Datetime;

/// String-keyed mapping with deterministic (sorted) key order.
pub type Record = BTreeMap<String, Value>;

/// A node of a content tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Explicit null / absent value.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Integer(i64),
    /// Floating point scalar.
    Float(f64),
    /// String scalar.
    String(String),
    /// Opaque date or datetime. Never traversed into.
    Date(Datetime),
    /// Ordered list of values.
    Sequence(Vec<Value>),
    /// Nested record.
    Record(Record),
}

impl Value {
    /// Borrow as string if this is a string scalar.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as record if this is a record.
    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Borrow as sequence if this is a sequence.
    #[must_use]
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Whether this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Human-readable kind name, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Sequence(_) => "list",
            Self::Record(_) => "record",
        }
    }

    /// Convert a YAML value, stringifying scalar mapping keys.
    ///
    /// # Errors
    ///
    /// Returns a message if a mapping key is itself a sequence or mapping.
    pub fn from_yaml(value: serde_yaml::Value) -> Result<Self, String> {
        use serde_yaml::Value as Yaml;

        Ok(match value {
            Yaml::Null => Self::Null,
            Yaml::Bool(b) => Self::Bool(b),
            Yaml::Number(n) => number_from_parts(n.as_i64(), n.as_f64()),
            Yaml::String(s) => Self::String(s),
            Yaml::Sequence(items) => Self::Sequence(
                items
                    .into_iter()
                    .map(Self::from_yaml)
                    .collect::<Result<_, _>>()?,
            ),
            Yaml::Mapping(mapping) => {
                let mut record = Record::new();
                for (key, value) in mapping {
                    let key = match key {
                        Yaml::String(s) => s,
                        Yaml::Number(n) => n.to_string(),
                        Yaml::Bool(b) => b.to_string(),
                        Yaml::Null => "null".to_owned(),
                        other => {
                            return Err(format!(
                                "unsupported mapping key of kind {}",
                                yaml_kind(&other)
                            ));
                        }
                    };
                    record.insert(key, Self::from_yaml(value)?);
                }
                Self::Record(record)
            }
            Yaml::Tagged(tagged) => Self::from_yaml(tagged.value)?,
        })
    }
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        _ => "tagged value",
    }
}

fn number_from_parts(int: Option<i64>, float: Option<f64>) -> Value {
    match (int, float) {
        (Some(i), _) => Value::Integer(i),
        (None, Some(f)) => Value::Float(f),
        (None, None) => Value::Null,
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match value {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => number_from_parts(n.as_i64(), n.as_f64()),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => {
                Self::Record(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<toml::Value> for Value {
    fn from(value: toml::Value) -> Self {
        use toml::Value as Toml;

        match value {
            Toml::String(s) => Self::String(s),
            Toml::Integer(i) => Self::Integer(i),
            Toml::Float(f) => Self::Float(f),
            Toml::Boolean(b) => Self::Bool(b),
            Toml::Datetime(d) => Self::Date(d),
            Toml::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Toml::Table(table) => {
                Self::Record(table.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Sequence(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::Date(d) => serializer.serialize_str(&d.to_string()),
            Self::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Record(record) => {
                let mut map = serializer.serialize_map(Some(record.len()))?;
                for (key, value) in record {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

/// Copy entries of `base` into `record` for keys `record` does not have yet.
///
/// Existing keys of `record` always win.
pub fn merge_missing(record: &mut Record, base: Record) {
    for (key, value) in base {
        record.entry(key).or_insert(value);
    }
}
