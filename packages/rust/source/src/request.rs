//! Backend-neutral request descriptions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How to find a page document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLookup {
    pub slug: String,
    /// Restrict to one content type when the route names it.
    pub doc_type: Option<String>,
}

impl DocumentLookup {
    pub fn new(slug: impl Into<String>, doc_type: Option<String>) -> Self {
        Self {
            slug: slug.into(),
            doc_type,
        }
    }
}

/// A remote read issued on behalf of a module or page processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchRequest {
    /// Latest documents of one content type.
    Collection {
        doc_type: String,
        limit: usize,
        /// Field sorted descending, e.g. `publishedAt`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_by: Option<String>,
        /// Equality filters, field → value.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        filters: BTreeMap<String, String>,
        /// Documents to leave out (e.g. the page being rendered).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exclude_ids: Vec<String>,
    },
    /// Backend-specific path (REST) or query (query-language) with parameters.
    Raw {
        query: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        params: BTreeMap<String, String>,
    },
}

impl FetchRequest {
    /// Listing of `doc_type` with no filters.
    pub fn collection(doc_type: impl Into<String>, limit: usize) -> Self {
        Self::Collection {
            doc_type: doc_type.into(),
            limit,
            order_by: None,
            filters: BTreeMap::new(),
            exclude_ids: Vec::new(),
        }
    }
}
