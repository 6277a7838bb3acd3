//! Content parsing, fragment resolution and unit validation for Loom.
//!
//! This crate provides:
//! - [`FileParser`]: parses markdown (with front matter), YAML, JSON, TOML and
//!   registered module formats into [`Record`]s
//! - [`traverse`]: the generic tree walk driving every content pass
//! - [`FragmentResolver`]: inlines `_` / `_name` fragment references
//! - [`Validator`] and [`ShapeValidator`]: validate referenced units against
//!   declarative [`Shape`]s
//! - [`VirtualUnitProcessor`]: renders embedded markdown into content-addressed
//!   [`VirtualUnit`]s through a [`MarkupPipeline`]
//! - [`ContentLoader`]: discovery plus the three passes for one entry
//!
//! # Quick Start
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use loom_content::{ContentLoader, LoaderConfig, Recorder};
//!
//! let loader = ContentLoader::new(LoaderConfig::new("content", "components"));
//! let recorder = Recorder::new();
//!
//! let page = loader.load("guide", &recorder)?;
//! println!("{} read {} files", page.path, recorder.unique_files().len());
//! # Ok(())
//! # }
//! ```

mod discovery;
mod error;
mod fragment;
mod loader;
mod markup;
mod parser;
mod report;
mod shape;
mod traverse;
mod validator;
mod value;
mod virtual_unit;

pub use discovery::{Entry, discover};
pub use error::{ContentError, ValidationError, Violation};
pub use fragment::{FragmentResolver, ROOT_REFERENCE, has_references};
pub use loader::{ContentLoader, DEFAULT_INDEX, LoaderConfig, Page, normalize_path};
pub use markup::{EXTENSION_NAMES, MarkdownPipeline, MarkupPipeline, Rendered, slugify};
pub use parser::{
    BODY_FIELD, BUILTIN_EXTENSIONS, FileParser, ModuleExport, ModuleFactory, ModuleLoader,
};
pub use report::{Recorder, Reporter};
pub use shape::{FieldShape, FieldType, Shape, UnknownFields};
pub use traverse::{SequenceMode, traverse, traverse_record};
pub use validator::{
    SHAPE_EXTENSIONS, ShapeRegistry, ShapeValidator, ValidationContext, Validator,
    is_referenced_unit,
};
pub use value::{Record, Value, merge_missing};
pub use virtual_unit::{
    OPTIONS_FIELD, PARENT_FIELD, VirtualUnit, VirtualUnitProcessor, unit_id, virtual_record,
};
