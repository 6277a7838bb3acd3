//! CLI error types.

use loom_config::ConfigError;
use loom_content::ContentError;
use loom_site::SiteError;

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Content(#[from] ContentError),

    #[error("{0}")]
    Site(#[from] SiteError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}
