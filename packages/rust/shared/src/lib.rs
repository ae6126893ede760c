//! Shared types, error model, and configuration for Folio.
//!
//! This crate is the foundation depended on by all other Folio crates.
//! It provides:
//! - [`FolioError`]: the unified error type
//! - Domain types ([`RequestContext`], [`Module`], [`Settled`])
//! - Content node classification ([`NodeKind`], [`Classifier`])
//! - Configuration ([`AppConfig`], config loading) and static [`SiteConfig`]

pub mod config;
pub mod error;
pub mod node;
pub mod site;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BlockOutput, CacheBackend, CacheConfig, SiteSettings, SourceConfig, SourceKind,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{FolioError, Result};
pub use node::{Classifier, NodeKind};
pub use site::{
    ExpandField, GlobalSpec, OgTags, ReferenceConfig, RouteEntry, RouteMatch, SiteConfig,
    Translations,
};
pub use types::{Module, RequestContext, Settled, slug_case};
