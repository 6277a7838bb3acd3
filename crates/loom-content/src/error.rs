//! Error types for content loading.

use std::fmt;
use std::path::PathBuf;

/// Error returned when loading, resolving or validating content fails.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// Source or fragment file does not exist.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
    /// No parser is registered for the file's extension.
    #[error("Unsupported file extension: {}", .0.display())]
    UnsupportedFileExtension(PathBuf),
    /// I/O error reading a file.
    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// File content could not be parsed into a record.
    #[error("Failed to parse {}: {message}", path.display())]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// Site path is not among the discovered entries.
    #[error("Entry not found: '{path}'. Known entries: {}", KnownEntries(.known))]
    EntryNotFound {
        /// Requested site path.
        path: String,
        /// Currently discovered site paths.
        known: Vec<String>,
    },
    /// Entry has no source file among the recognized extensions.
    #[error("Page not found: '{0}' has no source file with a recognized extension")]
    PageNotFound(String),
    /// Fragment reference resolves outside the content root.
    #[error("Fragment reference '{0}' points outside the content root")]
    FragmentOutsideRoot(String),
    /// Fragment chain references a file that is already being resolved.
    #[error("Cyclic fragment reference: {}", DisplayChain(.chain))]
    CyclicFragmentReference {
        /// Fragment files from the outermost reference to the repeated one.
        chain: Vec<PathBuf>,
    },
    /// Renderable unit failed validation against its declared shape.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Markup pipeline rejected its input or options.
    #[error("Markup error: {0}")]
    Markup(String),
    /// A state the pipeline asserts cannot occur.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl ContentError {
    /// Create an I/O error, mapping `NotFound` to [`ContentError::FileNotFound`].
    #[must_use]
    pub fn io(path: PathBuf, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound(path)
        } else {
            Self::Io { path, source }
        }
    }

    /// Create a parse error.
    #[must_use]
    pub fn parse(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// A single shape violation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// Dotted field path (e.g., "items.0.title").
    pub field: String,
    /// What is wrong with the field.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation failure for a referenced unit.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Validation failed for component '{component}': {}", DisplayViolations(.violations))]
pub struct ValidationError {
    /// Unit reference that failed validation.
    pub component: String,
    /// Every violated field.
    pub violations: Vec<Violation>,
}

struct KnownEntries<'a>(&'a [String]);

impl fmt::Display for KnownEntries<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(none)");
        }
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "/{entry}")?;
        }
        Ok(())
    }
}

struct DisplayChain<'a>(&'a [PathBuf]);

impl fmt::Display for DisplayChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, path) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", path.display())?;
        }
        Ok(())
    }
}

struct DisplayViolations<'a>(&'a [Violation]);

impl fmt::Display for DisplayViolations<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_not_found_lists_known_entries() {
        let err = ContentError::EntryNotFound {
            path: "missing".to_owned(),
            known: vec![String::new(), "guide".to_owned()],
        };
        assert_eq!(
            err.to_string(),
            "Entry not found: 'missing'. Known entries: /, /guide"
        );
    }

    #[test]
    fn test_entry_not_found_without_entries() {
        let err = ContentError::EntryNotFound {
            path: "x".to_owned(),
            known: Vec::new(),
        };
        assert!(err.to_string().ends_with("(none)"));
    }

    #[test]
    fn test_io_not_found_maps_to_file_not_found() {
        let err = ContentError::io(
            PathBuf::from("/a.yaml"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, ContentError::FileNotFound(_)));
    }

    #[test]
    fn test_validation_error_names_component_and_fields() {
        let err = ValidationError {
            component: "Hero".to_owned(),
            violations: vec![
                Violation {
                    field: "title".to_owned(),
                    message: "required field is missing".to_owned(),
                },
                Violation {
                    field: "count".to_owned(),
                    message: "expected integer, found string".to_owned(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Validation failed for component 'Hero': title: required field is missing; \
             count: expected integer, found string"
        );
    }

    #[test]
    fn test_cycle_displays_chain() {
        let err = ContentError::CyclicFragmentReference {
            chain: vec![PathBuf::from("/c/_a.yaml"), PathBuf::from("/c/_a.yaml")],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic fragment reference: /c/_a.yaml -> /c/_a.yaml"
        );
    }
}
