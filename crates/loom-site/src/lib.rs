//! Incremental build cache and site facade for Loom.
//!
//! This crate provides:
//! - [`BuildCache`]: single-flight page cache with file and virtual unit
//!   dependency tracking
//! - [`Site`]: a [`loom_content::ContentLoader`] wrapped in a build cache,
//!   with file-change invalidation
//!
//! # Quick Start
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use loom_content::{ContentLoader, LoaderConfig};
//! use loom_site::Site;
//!
//! let site = Site::new(ContentLoader::new(LoaderConfig::new("content", "components")));
//!
//! for entry in site.entries().iter() {
//!     let page = site.load(&entry.path)?;
//!     assert_eq!(page.path, entry.path);
//! }
//! # Ok(())
//! # }
//! ```

mod build_cache;
mod error;
mod site;

pub use build_cache::{BuildCache, CacheStats, Invalidation, LoadResult, ResolvedPage};
pub use error::SiteError;
pub use site::Site;
