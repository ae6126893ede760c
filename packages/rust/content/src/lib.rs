//! Content transformation for assembled pages.
//!
//! This crate provides:
//! - [`Normalizer`]: localization, block conversion, draft stripping, reference collection
//! - [`ReferenceResolver`]: batch reference fetch, substitution, and collection URLs
//! - [`convert_blocks_to_html`]: the rich-text block renderer

pub mod blocks;
pub mod normalize;
pub mod resolve;

use serde_json::Value;
use tracing::debug;

use folio_shared::{Classifier, RequestContext, SiteConfig, SiteSettings};
use folio_source::ContentSource;

pub use blocks::{blocks_to_submodules, convert_blocks_to_html};
pub use normalize::Normalizer;
pub use resolve::ReferenceResolver;

/// Classifier for the site's languages and image naming.
pub fn classifier_for(settings: &SiteSettings) -> Classifier {
    Classifier::new(settings.languages.clone(), settings.image_prefix.clone())
}

/// Normalize `tree` and resolve its references in one pass over the whole tree.
///
/// A tree that is itself a draft comes back as `null`.
pub async fn transform(
    source: &dyn ContentSource,
    tree: Value,
    ctx: &RequestContext,
    site: &SiteConfig,
    settings: &SiteSettings,
) -> Value {
    let classifier = classifier_for(settings);
    let mut normalizer = Normalizer::new(&classifier, ctx, settings.block_output);
    let tree = normalizer.normalize(tree).unwrap_or(Value::Null);
    let pending = normalizer.into_pending();
    debug!(references = pending.len(), "normalized tree");

    ReferenceResolver::new(&classifier, site, settings)
        .resolve(source, tree, &pending, ctx)
        .await
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use folio_shared::{FolioError, GlobalSpec, ReferenceConfig, Result};
    use folio_source::{ContentSource, DocumentLookup, FetchRequest};

    /// In-process source serving a fixed document map.
    #[derive(Default)]
    pub struct StubSource {
        docs: HashMap<String, Value>,
        fail: bool,
        batch_calls: AtomicUsize,
    }

    impl StubSource {
        pub fn with_docs<const N: usize>(docs: [(&str, Value); N]) -> Self {
            Self {
                docs: docs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
                ..Default::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn batch_calls(&self) -> usize {
            self.batch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch_document(
            &self,
            _lookup: &DocumentLookup,
            _language: Option<&str>,
        ) -> Result<Option<Value>> {
            Ok(None)
        }

        async fn fetch_global(
            &self,
            _name: &str,
            _spec: &GlobalSpec,
            _language: Option<&str>,
        ) -> Result<Option<Value>> {
            Ok(None)
        }

        async fn fetch_batch(
            &self,
            ids: &BTreeSet<String>,
            _references: &ReferenceConfig,
        ) -> Result<HashMap<String, Value>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FolioError::Network("connection refused".into()));
            }
            Ok(ids
                .iter()
                .filter_map(|id| self.docs.get(id).map(|d| (id.clone(), d.clone())))
                .collect())
        }

        async fn fetch(&self, _request: &FetchRequest, _language: Option<&str>) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn post_mutations(&self, _ops: &[Value]) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubSource;
    use folio_shared::RouteEntry;
    use serde_json::json;

    #[tokio::test]
    async fn batch_round_trip_substitutes_fetched_fields() {
        let doc = json!({"_id": "doc-7", "_type": "person", "name": "Ada"});
        let source = StubSource::with_docs([("doc-7", doc.clone())]);
        let ctx = RequestContext::new(Some("en".into()), "en");
        let site = SiteConfig {
            routes: vec![RouteEntry {
                pattern: "/:slug".into(),
                doc_type: "page".into(),
            }],
            ..Default::default()
        };

        let tree = json!({
            "title": {"en": "Team", "pl": "Zespół"},
            "lead": {"_type": "reference", "_ref": "doc-7", "_key": "k"}
        });
        let out = transform(&source, tree, &ctx, &site, &SiteSettings::default()).await;
        assert_eq!(out, json!({"title": "Team", "lead": doc}));
        assert_eq!(source.batch_calls(), 1);
    }

    #[tokio::test]
    async fn reference_inside_block_content_is_resolved() {
        let post = json!({
            "_id": "post-1",
            "_type": "post",
            "slug": {"current": "hello"},
            "title": {"en": "Hello", "pl": "Cześć"}
        });
        let source = StubSource::with_docs([("post-1", post)]);
        let ctx = RequestContext::new(Some("pl".into()), "en");
        let site = SiteConfig {
            routes: vec![RouteEntry {
                pattern: "/blog/:slug".into(),
                doc_type: "post".into(),
            }],
            ..Default::default()
        };
        let para = |text: &str| {
            json!({
                "_type": "block",
                "style": "normal",
                "children": [{"_type": "span", "text": text, "marks": []}],
                "markDefs": []
            })
        };

        let tree = json!({
            "body": [para("a"), {"_type": "reference", "_ref": "post-1", "_key": "r"}, para("b")]
        });
        let out = transform(&source, tree, &ctx, &site, &SiteSettings::default()).await;

        assert_eq!(source.batch_calls(), 1);
        let body = out["body"].as_array().expect("submodules");
        assert_eq!(body.len(), 3);
        assert_eq!(body[0], json!({"type": "text", "content": "<p>a</p>"}));
        assert_eq!(body[1]["type"], "post");
        assert_eq!(body[1]["_id"], "post-1");
        assert_eq!(body[1]["title"], "Cześć");
        assert_eq!(body[1]["url"], "/pl/blog/hello");
        assert!(body[1].get("_ref").is_none());
        assert_eq!(body[2], json!({"type": "text", "content": "<p>b</p>"}));
    }

    #[tokio::test]
    async fn draft_root_becomes_null() {
        let source = StubSource::default();
        let ctx = RequestContext::new(Some("en".into()), "en");
        let out = transform(
            &source,
            json!({"_id": "drafts.home"}),
            &ctx,
            &SiteConfig::default(),
            &SiteSettings::default(),
        )
        .await;
        assert_eq!(out, Value::Null);
    }
}
