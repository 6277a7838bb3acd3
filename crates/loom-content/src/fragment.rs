//! Fragment resolution.
//!
//! Records reference fragment files through underscore keys:
//!
//! - `_: "shared/base.yaml"` merges the fragment underneath the record (the
//!   record's own keys win)
//! - `_hero: "blocks/hero.yaml"` attaches the fragment under `hero`
//!
//! Paths are relative to the content root. Fragments are resolved
//! recursively; a fragment that (transitively) references itself is an error.

use std::path::{Component, Path, PathBuf};

use crate::error::ContentError;
use crate::parser::FileParser;
use crate::report::Reporter;
use crate::traverse::{SequenceMode, traverse_record};
use crate::value::{Record, Value, merge_missing};

/// Key of a root fragment reference.
pub const ROOT_REFERENCE: &str = "_";

/// Whether the record has any underscore key.
#[must_use]
pub fn has_references(record: &Record) -> bool {
    record.keys().any(|key| key.starts_with('_'))
}

/// Inlines fragment references below one content root.
#[derive(Debug)]
pub struct FragmentResolver<'a> {
    root: &'a Path,
    parser: &'a FileParser,
    mode: SequenceMode,
}

impl<'a> FragmentResolver<'a> {
    #[must_use]
    pub fn new(root: &'a Path, parser: &'a FileParser, mode: SequenceMode) -> Self {
        Self { root, parser, mode }
    }

    /// Resolve every fragment reference in `record`, which was read from `origin`.
    ///
    /// Every fragment file read is reported once per reference occurrence.
    ///
    /// # Errors
    ///
    /// Returns `FragmentOutsideRoot` for paths escaping the content root,
    /// `CyclicFragmentReference` when a fragment references itself, or the
    /// parser's error for unreadable fragments.
    pub fn resolve(
        &self,
        record: Record,
        origin: &Path,
        reporter: &dyn Reporter,
    ) -> Result<Record, ContentError> {
        self.resolve_within(record, &[origin.to_path_buf()], reporter)
    }

    fn resolve_within(
        &self,
        record: Record,
        chain: &[PathBuf],
        reporter: &dyn Reporter,
    ) -> Result<Record, ContentError> {
        traverse_record(record, self.mode, &has_references, &|record| {
            self.expand(record, chain, reporter)
        })
    }

    fn expand(
        &self,
        mut record: Record,
        chain: &[PathBuf],
        reporter: &dyn Reporter,
    ) -> Result<Record, ContentError> {
        if let Some(Value::String(target)) = record.get(ROOT_REFERENCE) {
            let target = target.clone();
            record.remove(ROOT_REFERENCE);
            let base = self.load(&target, chain, reporter)?;
            merge_missing(&mut record, base);
        }

        let named: Vec<String> = record
            .iter()
            .filter(|(key, value)| {
                key.len() > 1 && key.starts_with('_') && matches!(value, Value::String(_))
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in named {
            let Some(Value::String(target)) = record.remove(&key) else {
                continue;
            };
            let fragment = self.load(&target, chain, reporter)?;
            record.insert(key[1..].to_owned(), Value::Record(fragment));
        }

        Ok(record)
    }

    fn load(
        &self,
        target: &str,
        chain: &[PathBuf],
        reporter: &dyn Reporter,
    ) -> Result<Record, ContentError> {
        let path = self.fragment_path(target)?;
        if chain.contains(&path) {
            let mut cycle = chain.to_vec();
            cycle.push(path);
            return Err(ContentError::CyclicFragmentReference { chain: cycle });
        }

        tracing::debug!(path = %path.display(), "Resolving fragment");
        let fragment = self.parser.parse(&path, reporter)?;

        let mut next = chain.to_vec();
        next.push(path);
        self.resolve_within(fragment, &next, reporter)
    }

    /// Absolute path of a fragment reference, normalized lexically.
    fn fragment_path(&self, target: &str) -> Result<PathBuf, ContentError> {
        let outside = || ContentError::FragmentOutsideRoot(target.to_owned());

        let mut path = self.root.to_path_buf();
        let mut depth = 0usize;
        for component in Path::new(target.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(outside());
                    }
                    path.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => return Err(outside()),
            }
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::report::Recorder;

    fn record(value: serde_json::Value) -> Record {
        match Value::from(value) {
            Value::Record(record) => record,
            _ => unreachable!(),
        }
    }

    fn write(root: &Path, name: &str, content: &str) {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn resolve(root: &Path, input: serde_json::Value) -> (Result<Record, ContentError>, Recorder) {
        let parser = FileParser::new();
        let resolver = FragmentResolver::new(root, &parser, SequenceMode::Preserve);
        let recorder = Recorder::new();
        let result = resolver.resolve(record(input), &root.join("index.yaml"), &recorder);
        (result, recorder)
    }

    #[test]
    fn test_root_reference_to_empty_fragment() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "a.yaml", "{}\n");

        let (result, recorder) = resolve(temp_dir.path(), json!({"_": "a.yaml"}));

        assert_eq!(result.unwrap(), Record::new());
        assert_eq!(recorder.files(), vec![temp_dir.path().join("a.yaml")]);
    }

    #[test]
    fn test_named_reference_attaches_fragment() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "a.yaml", "foo: bar\n");

        let (result, _) = resolve(temp_dir.path(), json!({"_x": "a.yaml"}));

        assert_eq!(result.unwrap(), record(json!({"x": {"foo": "bar"}})));
    }

    #[test]
    fn test_root_reference_keeps_own_keys() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "a.yaml", "foo: theirs\nbar: added\n");

        let (result, _) = resolve(temp_dir.path(), json!({"_": "a.yaml", "foo": "mine"}));

        assert_eq!(result.unwrap(), record(json!({"foo": "mine", "bar": "added"})));
    }

    #[test]
    fn test_named_reference_overwrites_existing_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "a.yaml", "foo: bar\n");

        let (result, _) = resolve(temp_dir.path(), json!({"_x": "a.yaml", "x": "old"}));

        assert_eq!(result.unwrap(), record(json!({"x": {"foo": "bar"}})));
    }

    #[test]
    fn test_nested_fragments_resolved_recursively() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "_parts/outer.yaml", "_inner: /_parts/inner.json\nlevel: outer\n");
        write(temp_dir.path(), "_parts/inner.json", r#"{"level": "inner"}"#);

        let (result, recorder) = resolve(
            temp_dir.path(),
            json!({"sections": [{"_": "_parts/outer.yaml"}]}),
        );

        assert_eq!(
            result.unwrap(),
            record(json!({"sections": [{"level": "outer", "inner": {"level": "inner"}}]}))
        );
        assert_eq!(recorder.files().len(), 2);
    }

    #[test]
    fn test_each_reference_occurrence_reported() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "a.yaml", "foo: bar\n");

        let (result, recorder) = resolve(
            temp_dir.path(),
            json!({"_one": "a.yaml", "_two": "a.yaml"}),
        );

        assert_eq!(
            result.unwrap(),
            record(json!({"one": {"foo": "bar"}, "two": {"foo": "bar"}}))
        );
        assert_eq!(recorder.files().len(), 2);
        assert_eq!(recorder.unique_files().len(), 1);
    }

    #[test]
    fn test_non_string_references_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();

        let (result, recorder) = resolve(
            temp_dir.path(),
            json!({"_": 1, "_flag": true, "_list": ["a.yaml"]}),
        );

        assert_eq!(
            result.unwrap(),
            record(json!({"_": 1, "_flag": true, "_list": ["a.yaml"]}))
        );
        assert!(recorder.files().is_empty());
    }

    #[test]
    fn test_cycle_detected() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "a.yaml", "_: b.yaml\n");
        write(temp_dir.path(), "b.yaml", "_next: a.yaml\n");

        let (result, _) = resolve(temp_dir.path(), json!({"_": "a.yaml"}));

        let Err(ContentError::CyclicFragmentReference { chain }) = result else {
            panic!("expected cycle error, got {result:?}");
        };
        let names: Vec<_> = chain
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["index.yaml", "a.yaml", "b.yaml", "a.yaml"]);
    }

    #[test]
    fn test_self_reference_from_entry_detected() {
        let temp_dir = tempfile::tempdir().unwrap();

        let (result, _) = resolve(temp_dir.path(), json!({"_": "index.yaml"}));

        assert!(matches!(
            result,
            Err(ContentError::CyclicFragmentReference { .. })
        ));
    }

    #[test]
    fn test_diamond_reuse_allowed() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "left.yaml", "_shared: shared.yaml\n");
        write(temp_dir.path(), "right.yaml", "_shared: shared.yaml\n");
        write(temp_dir.path(), "shared.yaml", "ok: true\n");

        let (result, _) = resolve(
            temp_dir.path(),
            json!({"_left": "left.yaml", "_right": "right.yaml"}),
        );

        assert_eq!(
            result.unwrap(),
            record(json!({
                "left": {"shared": {"ok": true}},
                "right": {"shared": {"ok": true}}
            }))
        );
    }

    #[test]
    fn test_reference_outside_root_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();

        let (result, _) = resolve(temp_dir.path(), json!({"_x": "../secret.yaml"}));

        assert!(matches!(result, Err(ContentError::FragmentOutsideRoot(_))));
    }

    #[test]
    fn test_missing_fragment_fails() {
        let temp_dir = tempfile::tempdir().unwrap();

        let (result, _) = resolve(temp_dir.path(), json!({"_x": "nope.yaml"}));

        assert!(matches!(result, Err(ContentError::FileNotFound(_))));
    }
}
