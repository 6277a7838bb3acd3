//! Unit validation.
//!
//! The second content pass hands every record that references a renderer
//! (and is not a virtual unit) to a [`Validator`]. The default
//! [`ShapeValidator`] looks the renderer's shape up in a [`ShapeRegistry`]
//! first, then in a descriptor file next to the renderer:
//!
//! ```text
//! <components_root>/<Component>.shape.yaml
//! <components_root>/<Component>.shape.yml
//! <components_root>/<Component>.shape.json
//! <components_root>/<Component>.shape.toml
//! ```
//!
//! A renderer without a shape passes its records through unchanged. Every
//! candidate path probed is reported as a dependency, so creating or removing
//! a descriptor evicts the pages that looked for it.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{ContentError, ValidationError, Violation};
use crate::report::Reporter;
use crate::shape::Shape;
use crate::value::Record;

/// Descriptor file extensions, in lookup order.
pub const SHAPE_EXTENSIONS: &[&str] = &["yaml", "yml", "json", "toml"];

/// Naming conventions shared by the validation and virtual unit passes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationContext {
    /// Record field naming the renderer that consumes a record.
    pub reference_field: String,
    /// Prefix marking system-generated unit references.
    pub virtual_prefix: String,
    /// Directory holding renderer shape descriptors.
    pub components_root: PathBuf,
}

impl ValidationContext {
    /// Reference of a record that names an authored renderer.
    ///
    /// Returns `None` for records without a string reference and for virtual
    /// unit references.
    #[must_use]
    pub fn referenced_component<'r>(&self, record: &'r Record) -> Option<&'r str> {
        record
            .get(&self.reference_field)?
            .as_str()
            .filter(|name| !name.starts_with(self.virtual_prefix.as_str()))
    }
}

/// Validates and transforms one referenced unit record.
///
/// Implementations report every file they read through `reporter`.
pub trait Validator: Send + Sync {
    /// Validate `record`, returning its replacement.
    fn validate(
        &self,
        record: Record,
        reporter: &dyn Reporter,
        context: &ValidationContext,
    ) -> Result<Record, ContentError>;
}

/// Shapes registered in code, keyed by renderer name.
#[derive(Clone, Debug, Default)]
pub struct ShapeRegistry {
    shapes: HashMap<String, Arc<Shape>>,
}

impl ShapeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the shape of a renderer.
    pub fn register(&mut self, component: impl Into<String>, shape: Shape) {
        self.shapes.insert(component.into(), Arc::new(shape));
    }

    /// Shape registered for a renderer.
    #[must_use]
    pub fn get(&self, component: &str) -> Option<Arc<Shape>> {
        self.shapes.get(component).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// Default validator backed by declarative shapes.
#[derive(Debug, Default)]
pub struct ShapeValidator {
    registry: ShapeRegistry,
}

impl ShapeValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_registry(registry: ShapeRegistry) -> Self {
        Self { registry }
    }

    /// Find the shape of a renderer.
    ///
    /// Every descriptor candidate probed is reported, whether or not it exists.
    fn find_shape(
        &self,
        component: &str,
        reporter: &dyn Reporter,
        context: &ValidationContext,
    ) -> Result<Option<Arc<Shape>>, ContentError> {
        if let Some(shape) = self.registry.get(component) {
            return Ok(Some(shape));
        }

        for extension in SHAPE_EXTENSIONS {
            let path = context
                .components_root
                .join(format!("{component}.shape.{extension}"));
            reporter.file(&path);
            if !path.is_file() {
                continue;
            }
            let shape = read_descriptor(&path, extension)?;
            return Ok(Some(Arc::new(shape)));
        }

        Ok(None)
    }
}

impl Validator for ShapeValidator {
    fn validate(
        &self,
        record: Record,
        reporter: &dyn Reporter,
        context: &ValidationContext,
    ) -> Result<Record, ContentError> {
        let Some(component) = context.referenced_component(&record).map(str::to_owned) else {
            return Ok(record);
        };
        check_component_name(&component, context)?;

        let Some(shape) = self.find_shape(&component, reporter, context)? else {
            tracing::debug!(%component, "No shape declared, passing record through");
            return Ok(record);
        };

        shape.apply(record, context).map_err(|violations| {
            ContentError::Validation(ValidationError {
                component,
                violations,
            })
        })
    }
}

fn check_component_name(component: &str, context: &ValidationContext) -> Result<(), ContentError> {
    let valid = !component.is_empty()
        && Path::new(component)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        return Ok(());
    }
    Err(ContentError::Validation(ValidationError {
        component: component.to_owned(),
        violations: vec![Violation {
            field: context.reference_field.clone(),
            message: "component reference must be a relative name without '..'".to_owned(),
        }],
    }))
}

fn read_descriptor(path: &Path, extension: &str) -> Result<Shape, ContentError> {
    let text = fs::read_to_string(path).map_err(|e| ContentError::io(path.to_path_buf(), e))?;
    match extension {
        "json" => serde_json::from_str(&text).map_err(|e| ContentError::parse(path, e)),
        "toml" => toml::from_str(&text).map_err(|e| ContentError::parse(path, e)),
        _ => serde_yaml::from_str(&text).map_err(|e| ContentError::parse(path, e)),
    }
}

/// Whether the record is a unit the validation pass must visit.
#[must_use]
pub fn is_referenced_unit(record: &Record, context: &ValidationContext) -> bool {
    context.referenced_component(record).is_some()
}
