//! Error types for site loading.

use std::sync::Arc;

use loom_content::ContentError;

/// Error returned when loading a page through the build cache fails.
///
/// Cloneable so every caller joining one in-flight load receives the same
/// error.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SiteError {
    /// Loading or resolving content failed.
    #[error(transparent)]
    Content(Arc<ContentError>),
    /// Two different inline contents produced the same virtual unit id.
    #[error("Virtual unit id collision: '{id}' is already registered for different content")]
    VirtualUnitCollision {
        /// Colliding unit id.
        id: String,
    },
}

impl SiteError {
    /// Underlying content error, if any.
    #[must_use]
    pub fn content(&self) -> Option<&ContentError> {
        match self {
            Self::Content(e) => Some(e),
            Self::VirtualUnitCollision { .. } => None,
        }
    }
}

impl From<ContentError> for SiteError {
    fn from(e: ContentError) -> Self {
        Self::Content(Arc::new(e))
    }
}
