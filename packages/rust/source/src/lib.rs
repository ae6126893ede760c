//! Content backends.
//!
//! This crate provides:
//! - [`ContentSource`]: the capability every CMS backend implements
//! - [`RestSource`]: generic REST document API
//! - [`QuerySource`]: query-language document store
//! - [`HttpFetcher`]: shared JSON transport with response caching

pub mod http;
pub mod query;
pub mod request;
pub mod rest;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use folio_cache::ResponseCache;
use folio_shared::{AppConfig, GlobalSpec, ReferenceConfig, Result, SourceKind};

pub use http::HttpFetcher;
pub use query::QuerySource;
pub use request::{DocumentLookup, FetchRequest};
pub use rest::RestSource;

/// A remote CMS the gateway reads pages from.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Backend name for tracing.
    fn name(&self) -> &str;

    /// Resolve a slug to its full document; `None` when nothing matches.
    async fn fetch_document(
        &self,
        lookup: &DocumentLookup,
        language: Option<&str>,
    ) -> Result<Option<Value>>;

    /// Fetch a named site-wide scaffold.
    async fn fetch_global(
        &self,
        name: &str,
        spec: &GlobalSpec,
        language: Option<&str>,
    ) -> Result<Option<Value>>;

    /// Fetch many documents in one remote call. Missing ids are absent.
    async fn fetch_batch(
        &self,
        ids: &BTreeSet<String>,
        references: &ReferenceConfig,
    ) -> Result<HashMap<String, Value>>;

    /// Execute a processor's request.
    async fn fetch(&self, request: &FetchRequest, language: Option<&str>) -> Result<Value>;

    /// Apply write-back operations. Failures are logged and reported as `false`.
    async fn post_mutations(&self, ops: &[Value]) -> bool;
}

/// Build the backend described by `config`, caching reads through `cache`.
pub fn connect(
    config: &AppConfig,
    cache: Option<Arc<ResponseCache>>,
) -> Result<Arc<dyn ContentSource>> {
    let base = config.source.parsed_base_url()?;
    let http = HttpFetcher::new(&config.source, cache)?;
    tracing::debug!(kind = ?config.source.kind, %base, "connecting content source");
    Ok(match config.source.kind {
        SourceKind::Rest => Arc::new(RestSource::new(base, http, config.site.clone())),
        SourceKind::Query => Arc::new(QuerySource::new(
            base,
            config.source.dataset.clone(),
            config.source.api_version.clone(),
            http,
        )),
    })
}
