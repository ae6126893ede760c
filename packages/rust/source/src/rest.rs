//! Generic REST document API backend.
//!
//! Endpoints (relative to the base URL):
//! - `GET /{collection}?where[slug][equals]=..` → `{docs: [...]}`
//! - `GET /{collection}/{id}` → the document as a direct object
//! - `GET /globals/{name}` → the global as a direct object
//! - `GET /documents?where[id][in]=a,b` → `{docs: [...]}` across collections
//! - `POST /mutations` with `{mutations: [...]}`

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use url::Url;

use folio_shared::{FolioError, GlobalSpec, ReferenceConfig, Result, SiteSettings};

use crate::ContentSource;
use crate::http::{HttpFetcher, document, document_id, documents};
use crate::request::{DocumentLookup, FetchRequest};

/// Collection searched when a lookup names no content type.
const DEFAULT_COLLECTION: &str = "pages";

/// Cross-collection endpoint used for batch reference fetches.
const DOCUMENTS_ENDPOINT: &str = "documents";

/// Depth the backend populates relations to when loading a full document.
const DOCUMENT_DEPTH: u32 = 2;

pub struct RestSource {
    base: Url,
    http: HttpFetcher,
    site: SiteSettings,
}

impl RestSource {
    pub fn new(base: Url, http: HttpFetcher, site: SiteSettings) -> Self {
        // Url::join drops the last segment unless the base ends with '/'.
        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base, http, site }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| FolioError::validation(format!("bad endpoint {path:?}: {e}")))
    }

    fn locale(&self, language: Option<&str>) -> String {
        self.site.locale_for(language)
    }
}

#[async_trait]
impl ContentSource for RestSource {
    fn name(&self) -> &str {
        "rest"
    }

    #[instrument(skip_all, fields(slug = %lookup.slug))]
    async fn fetch_document(
        &self,
        lookup: &DocumentLookup,
        language: Option<&str>,
    ) -> Result<Option<Value>> {
        let collection = lookup.doc_type.as_deref().unwrap_or(DEFAULT_COLLECTION);
        let locale = self.locale(language);

        // The list endpoint only returns shallow documents; resolve the id first.
        let mut url = self.endpoint(collection)?;
        url.query_pairs_mut()
            .append_pair("where[slug][equals]", &lookup.slug)
            .append_pair("locale", &locale)
            .append_pair("limit", "1")
            .append_pair("depth", "0");
        let listing = match self.http.get_json(url).await {
            Ok(body) => body,
            // An unknown collection is a missing document, not a failure.
            Err(FolioError::Http { status: 404, .. }) => {
                debug!(collection, "collection not found");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Some(id) = document(listing).and_then(|d| document_id(&d)) else {
            debug!("no document matches slug");
            return Ok(None);
        };

        let mut url = self.endpoint(&format!("{collection}/{id}"))?;
        url.query_pairs_mut()
            .append_pair("locale", &locale)
            .append_pair("depth", &DOCUMENT_DEPTH.to_string());
        Ok(document(self.http.get_json(url).await?))
    }

    async fn fetch_global(
        &self,
        name: &str,
        spec: &GlobalSpec,
        language: Option<&str>,
    ) -> Result<Option<Value>> {
        let slug = spec.path.as_deref().unwrap_or(name);
        let mut url = self.endpoint(&format!("globals/{slug}"))?;
        url.query_pairs_mut()
            .append_pair("locale", &self.locale(language));
        Ok(document(self.http.get_json(url).await?))
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn fetch_batch(
        &self,
        ids: &BTreeSet<String>,
        references: &ReferenceConfig,
    ) -> Result<HashMap<String, Value>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = ids.iter().map(String::as_str).collect::<Vec<_>>().join(",");
        let depth = if references.expand.is_empty() { 0 } else { 1 };

        let mut url = self.endpoint(DOCUMENTS_ENDPOINT)?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("where[id][in]", &joined)
                .append_pair("limit", &ids.len().to_string())
                .append_pair("depth", &depth.to_string());
            q.append_pair("select", &references.projected_fields().join(","));
        }

        let found: HashMap<String, Value> = documents(self.http.get_json(url).await?)
            .into_iter()
            .filter_map(|doc| document_id(&doc).map(|id| (id, doc)))
            .collect();
        debug!(requested = ids.len(), found = found.len(), "batch fetched");
        Ok(found)
    }

    async fn fetch(&self, request: &FetchRequest, language: Option<&str>) -> Result<Value> {
        let url = match request {
            FetchRequest::Collection {
                doc_type,
                limit,
                order_by,
                filters,
                exclude_ids,
            } => {
                let mut url = self.endpoint(doc_type)?;
                {
                    let mut q = url.query_pairs_mut();
                    q.append_pair("limit", &limit.to_string())
                        .append_pair("locale", &self.locale(language));
                    if let Some(field) = order_by {
                        q.append_pair("sort", &format!("-{field}"));
                    }
                    for (field, value) in filters {
                        q.append_pair(&format!("where[{field}][equals]"), value);
                    }
                    if !exclude_ids.is_empty() {
                        q.append_pair("where[id][not_in]", &exclude_ids.join(","));
                    }
                }
                url
            }
            FetchRequest::Raw { query, params } => {
                let mut url = self.endpoint(query)?;
                {
                    let mut q = url.query_pairs_mut();
                    for (k, v) in params {
                        q.append_pair(k, v);
                    }
                }
                url
            }
        };

        let body = self.http.get_json(url).await?;
        Ok(match request {
            FetchRequest::Collection { .. } => Value::Array(documents(body)),
            FetchRequest::Raw { .. } => body,
        })
    }

    async fn post_mutations(&self, ops: &[Value]) -> bool {
        let url = match self.endpoint("mutations") {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build mutations endpoint");
                return false;
            }
        };
        match self.http.post_json(url, &json!({ "mutations": ops })).await {
            Ok(_) => {
                debug!(count = ops.len(), "mutations applied");
                true
            }
            Err(e) => {
                warn!(error = %e, count = ops.len(), "mutations failed");
                false
            }
        }
    }
}
