//! Generic content tree traversal.
//!
//! [`traverse`] is the single recursive walk used by every content pass.
//! At each record it first applies the pass's transform (when the filter
//! matches) and then descends into the values of the *transformed* record.
//! Sibling subtrees are walked concurrently on the rayon pool.

use rayon::prelude::*;

use crate::error::ContentError;
use crate::value::{Record, Value};

/// How sequences are rebuilt after their elements are traversed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SequenceMode {
    /// Keep the sequence structure as-is.
    #[default]
    Preserve,
    /// Splice elements that are themselves sequences into the parent,
    /// one level deep.
    FlattenOne,
}

impl SequenceMode {
    /// Mode for the `flatten_sequences` configuration switch.
    #[must_use]
    pub fn from_flag(flatten: bool) -> Self {
        if flatten {
            Self::FlattenOne
        } else {
            Self::Preserve
        }
    }
}

/// Walk `value`, replacing every record matching `filter` with `transform(record)`.
///
/// Scalars and dates are returned unchanged. The filter is not re-applied to
/// a record returned by the transform, only to its descendants.
///
/// # Errors
///
/// Returns the first error produced by `transform` anywhere in the tree.
pub fn traverse<F, T>(
    value: Value,
    mode: SequenceMode,
    filter: &F,
    transform: &T,
) -> Result<Value, ContentError>
where
    F: Fn(&Record) -> bool + Sync,
    T: Fn(Record) -> Result<Record, ContentError> + Sync,
{
    match value {
        Value::Record(record) => {
            let record = if filter(&record) {
                transform(record)?
            } else {
                record
            };
            let record = record
                .into_par_iter()
                .map(|(key, child)| Ok((key, traverse(child, mode, filter, transform)?)))
                .collect::<Result<Record, ContentError>>()?;
            Ok(Value::Record(record))
        }
        Value::Sequence(items) => {
            let items = items
                .into_par_iter()
                .map(|item| traverse(item, mode, filter, transform))
                .collect::<Result<Vec<_>, ContentError>>()?;
            Ok(Value::Sequence(match mode {
                SequenceMode::Preserve => items,
                SequenceMode::FlattenOne => flatten_one(items),
            }))
        }
        other => Ok(other),
    }
}

/// Traverse a root record, which must stay a record.
///
/// # Errors
///
/// Returns the transform's error, or `InvariantViolation` if the root stopped
/// being a record.
pub fn traverse_record<F, T>(
    record: Record,
    mode: SequenceMode,
    filter: &F,
    transform: &T,
) -> Result<Record, ContentError>
where
    F: Fn(&Record) -> bool + Sync,
    T: Fn(Record) -> Result<Record, ContentError> + Sync,
{
    match traverse(Value::Record(record), mode, filter, transform)? {
        Value::Record(record) => Ok(record),
        other => Err(ContentError::InvariantViolation(format!(
            "traversal turned the root record into a {}",
            other.kind()
        ))),
    }
}

fn flatten_one(items: Vec<Value>) -> Vec<Value> {
    let mut flat = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Sequence(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    flat
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn value(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    fn has_marker(record: &Record) -> bool {
        record.contains_key("marker")
    }

    #[test]
    fn test_transform_applies_to_matching_records_only() {
        let tree = value(json!({
            "a": {"marker": 1},
            "b": {"plain": true},
            "c": [{"marker": 2}, "text", 3]
        }));

        let result = traverse(tree, SequenceMode::Preserve, &has_marker, &|mut record| {
            record.insert("seen".to_owned(), Value::Bool(true));
            Ok(record)
        })
        .unwrap();

        assert_eq!(
            result,
            value(json!({
                "a": {"marker": 1, "seen": true},
                "b": {"plain": true},
                "c": [{"marker": 2, "seen": true}, "text", 3]
            }))
        );
    }

    #[test]
    fn test_descends_into_transform_result() {
        let tree = value(json!({"marker": 0}));

        let result = traverse(tree, SequenceMode::Preserve, &has_marker, &|record| {
            let depth = match record.get("marker") {
                Some(Value::Integer(depth)) => *depth,
                _ => 0,
            };
            let mut out = Record::new();
            out.insert("depth".to_owned(), Value::Integer(depth));
            if depth < 2 {
                let mut child = Record::new();
                child.insert("marker".to_owned(), Value::Integer(depth + 1));
                out.insert("child".to_owned(), Value::Record(child));
            }
            Ok(out)
        })
        .unwrap();

        assert_eq!(
            result,
            value(json!({"depth": 0, "child": {"depth": 1, "child": {"depth": 2}}}))
        );
    }

    #[test]
    fn test_filter_not_reapplied_to_transformed_node() {
        let calls = AtomicUsize::new(0);
        let tree = value(json!({"marker": true}));

        let result = traverse(tree, SequenceMode::Preserve, &has_marker, &|record| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(record)
        })
        .unwrap();

        assert_eq!(result, value(json!({"marker": true})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dates_and_scalars_unchanged() {
        let table: toml::Table = toml::from_str("when = 2024-01-02\nn = 1.5\n").unwrap();
        let tree = Value::from(toml::Value::Table(table));

        let result =
            traverse(tree.clone(), SequenceMode::Preserve, &|_| true, &|r| Ok(r)).unwrap();

        assert_eq!(result, tree);
    }

    #[test]
    fn test_sequence_modes() {
        let tree = value(json!({"items": [[1, 2], 3, [[4]]]}));

        let preserved =
            traverse(tree.clone(), SequenceMode::Preserve, &|_| false, &|r| Ok(r)).unwrap();
        let flattened = traverse(tree, SequenceMode::FlattenOne, &|_| false, &|r| Ok(r)).unwrap();

        assert_eq!(preserved, value(json!({"items": [[1, 2], 3, [[4]]]})));
        assert_eq!(flattened, value(json!({"items": [1, 2, 3, [4]]})));
    }

    #[test]
    fn test_first_error_aborts() {
        let tree = value(json!({"ok": {"marker": 1}, "list": [{"marker": 2}]}));

        let err = traverse(tree, SequenceMode::Preserve, &has_marker, &|_| {
            Err(ContentError::Markup("boom".to_owned()))
        })
        .unwrap_err();

        assert!(matches!(err, ContentError::Markup(_)));
    }

    #[test]
    fn test_traverse_record_keeps_root_record() {
        let mut root = Record::new();
        root.insert("marker".to_owned(), Value::Null);

        let result = traverse_record(root, SequenceMode::Preserve, &has_marker, &|mut r| {
            r.remove("marker");
            Ok(r)
        })
        .unwrap();

        assert!(result.is_empty());
    }

    #[test]
    fn test_sequence_mode_from_flag() {
        assert_eq!(SequenceMode::from_flag(false), SequenceMode::Preserve);
        assert_eq!(SequenceMode::from_flag(true), SequenceMode::FlattenOne);
    }
}
