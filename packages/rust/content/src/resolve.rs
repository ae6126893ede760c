//! Reference resolution: batch fetch, substitution, and URL computation.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use folio_shared::node::TYPE_FIELD;
use folio_shared::{Classifier, NodeKind, RequestContext, SiteConfig, SiteSettings, slug_case};
use folio_source::ContentSource;

use crate::blocks::SUBMODULE_TYPE;
use crate::normalize::Normalizer;

/// Resolves reference markers left by the normalizer.
pub struct ReferenceResolver<'a> {
    classifier: &'a Classifier,
    site: &'a SiteConfig,
    settings: &'a SiteSettings,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(classifier: &'a Classifier, site: &'a SiteConfig, settings: &'a SiteSettings) -> Self {
        Self {
            classifier,
            site,
            settings,
        }
    }

    /// Fetch every pending id in one call, substitute markers, then add
    /// collection URLs. A failed batch leaves all markers in place.
    #[instrument(skip_all, fields(pending = pending.len()))]
    pub async fn resolve(
        &self,
        source: &dyn ContentSource,
        tree: Value,
        pending: &BTreeSet<String>,
        ctx: &RequestContext,
    ) -> Value {
        let docs = self.fetch(source, pending, ctx).await;
        let tree = self.substitute(tree, Some(&docs));
        self.resolve_urls(tree, ctx.language.as_deref())
    }

    async fn fetch(
        &self,
        source: &dyn ContentSource,
        pending: &BTreeSet<String>,
        ctx: &RequestContext,
    ) -> HashMap<String, Value> {
        if pending.is_empty() {
            return HashMap::new();
        }
        let fetched = match source.fetch_batch(pending, &self.site.references).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(error = %e, "reference batch failed, leaving markers unresolved");
                return HashMap::new();
            }
        };

        // Fetched documents are normalized too, but their own references are
        // not fetched again.
        let mut normalizer = Normalizer::new(self.classifier, ctx, self.settings.block_output);
        let docs: HashMap<String, Value> = fetched
            .into_iter()
            .filter_map(|(id, doc)| {
                let doc = normalizer.normalize(doc)?;
                Some((id, self.substitute(doc, None)))
            })
            .collect();
        debug!(requested = pending.len(), resolved = docs.len(), "references fetched");
        docs
    }

    /// Replace markers by fetched documents and images by CDN URLs.
    ///
    /// With `docs` set to `None` only image rewriting happens.
    pub fn substitute(&self, value: Value, docs: Option<&HashMap<String, Value>>) -> Value {
        match self.classifier.classify(&value) {
            NodeKind::Reference { id, image: true } => Value::String(self.image_url(&id)),
            NodeKind::Reference { id, image: false } => {
                match docs.and_then(|docs| docs.get(&id)) {
                    Some(doc) => keep_submodule_type(doc.clone(), &value),
                    None => {
                        debug!(id, "reference target missing, keeping marker");
                        value
                    }
                }
            }
            NodeKind::ImageAsset { id } if !id.is_empty() => Value::String(self.image_url(&id)),
            NodeKind::Null | NodeKind::Scalar => value,
            NodeKind::ImageAsset { .. }
            | NodeKind::Sequence
            | NodeKind::BlockContent
            | NodeKind::LocaleString
            | NodeKind::LocaleBlockContent
            | NodeKind::SimpleBlockContent
            | NodeKind::Draft
            | NodeKind::Object => self.substitute_children(value, docs),
        }
    }

    fn substitute_children(&self, value: Value, docs: Option<&HashMap<String, Value>>) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|v| self.substitute(v, docs))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.substitute(v, docs)))
                    .collect(),
            ),
            other => other,
        }
    }

    /// CDN URL for an image asset id: `image-abc-800x600-jpg` →
    /// `{cdn}/abc-800x600.jpg`.
    pub fn image_url(&self, id: &str) -> String {
        static EXT_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"-(jpe?g|png|gif|webp|svg|avif|tiff?)$").expect("valid regex")
        });

        let name = id.strip_prefix(&self.settings.image_prefix).unwrap_or(id);
        let name = EXT_RE.replace(name, ".$1");
        format!("{}/{name}", self.settings.image_cdn.trim_end_matches('/'))
    }

    /// Add `url` to every collection document that has a slug.
    pub fn resolve_urls(&self, value: Value, language: Option<&str>) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|v| self.resolve_urls(v, language))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut map: serde_json::Map<String, Value> = map
                    .into_iter()
                    .map(|(k, v)| (k, self.resolve_urls(v, language)))
                    .collect();
                let url = map
                    .get("_type")
                    .and_then(Value::as_str)
                    .and_then(|t| self.site.collection_path(t))
                    .zip(slug_of(&map))
                    .map(|(path, slug)| match language {
                        Some(lang) => format!("/{lang}{path}/{slug}"),
                        None => format!("{path}/{slug}"),
                    });
                if let Some(url) = url {
                    map.insert("url".into(), Value::String(url));
                }
                Value::Object(map)
            }
            other => other,
        }
    }
}

/// A reference embedded in block content is a submodule; the document that
/// replaces it is typed by its own `_type`.
fn keep_submodule_type(mut doc: Value, marker: &Value) -> Value {
    if marker.get(SUBMODULE_TYPE).is_none() {
        return doc;
    }
    if let Value::Object(map) = &mut doc {
        let kind = map
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .map(slug_case)
            .or_else(|| {
                marker
                    .get(SUBMODULE_TYPE)
                    .and_then(Value::as_str)
                    .map(String::from)
            });
        if let Some(kind) = kind {
            map.insert(SUBMODULE_TYPE.into(), Value::String(kind));
        }
    }
    doc
}

/// `slug` as a plain string or a `{current}` object.
fn slug_of(map: &serde_json::Map<String, Value>) -> Option<&str> {
    match map.get("slug")? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Object(slug) => slug
            .get("current")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubSource;
    use folio_shared::RouteEntry;
    use serde_json::json;

    fn classifier() -> Classifier {
        Classifier::new(vec!["en".into(), "pl".into()], "image-")
    }

    fn site() -> SiteConfig {
        SiteConfig {
            routes: vec![
                RouteEntry {
                    pattern: "/:slug".into(),
                    doc_type: "page".into(),
                },
                RouteEntry {
                    pattern: "/blog/:slug".into(),
                    doc_type: "post".into(),
                },
            ],
            ..Default::default()
        }
    }

    fn pending(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn reference_gains_collection_url() {
        let source = StubSource::with_docs([(
            "doc-1",
            json!({"_id": "doc-1", "slug": {"current": "about"}, "_type": "page"}),
        )]);
        let (c, site, settings) = (classifier(), site(), SiteSettings::default());
        let resolver = ReferenceResolver::new(&c, &site, &settings);
        let ctx = RequestContext::new(Some("en".into()), "en");

        let tree = json!({"link": {"_type": "reference", "_ref": "doc-1"}});
        let out = resolver
            .resolve(&source, tree, &pending(&["doc-1"]), &ctx)
            .await;
        assert_eq!(out["link"]["url"], "/en/about");
        assert_eq!(out["link"]["_id"], "doc-1");
        assert_eq!(source.batch_calls(), 1);
    }

    #[tokio::test]
    async fn missing_target_keeps_marker() {
        let source = StubSource::default();
        let (c, site, settings) = (classifier(), site(), SiteSettings::default());
        let resolver = ReferenceResolver::new(&c, &site, &settings);
        let ctx = RequestContext::new(Some("en".into()), "en");

        let marker = json!({"_type": "reference", "_ref": "gone"});
        let out = resolver
            .resolve(&source, json!([marker.clone()]), &pending(&["gone"]), &ctx)
            .await;
        assert_eq!(out, json!([marker]));
    }

    #[tokio::test]
    async fn failed_batch_keeps_markers() {
        let source = StubSource::failing();
        let (c, site, settings) = (classifier(), site(), SiteSettings::default());
        let resolver = ReferenceResolver::new(&c, &site, &settings);
        let ctx = RequestContext::new(Some("en".into()), "en");

        let tree = json!({"a": {"_type": "reference", "_ref": "x"}});
        let out = resolver.resolve(&source, tree.clone(), &pending(&["x"]), &ctx).await;
        assert_eq!(out, tree);
    }

    #[tokio::test]
    async fn no_pending_means_no_call() {
        let source = StubSource::default();
        let (c, site, settings) = (classifier(), site(), SiteSettings::default());
        let resolver = ReferenceResolver::new(&c, &site, &settings);
        let ctx = RequestContext::new(None, "en");

        let out = resolver
            .resolve(&source, json!({"_type": "post", "slug": "hello"}), &BTreeSet::new(), &ctx)
            .await;
        assert_eq!(out["url"], "/blog/hello");
        assert_eq!(source.batch_calls(), 0);
    }

    #[tokio::test]
    async fn fetched_documents_are_localized_and_images_rewritten() {
        let source = StubSource::with_docs([(
            "post-1",
            json!({
                "_id": "post-1",
                "_type": "post",
                "slug": {"current": "hello"},
                "title": {"en": "Hello", "pl": "Cześć"},
                "image": {"_type": "reference", "_ref": "image-abc123-800x600-jpg"},
                "author": {"_type": "reference", "_ref": "person-9"}
            }),
        )]);
        let (c, site, settings) = (classifier(), site(), SiteSettings::default());
        let resolver = ReferenceResolver::new(&c, &site, &settings);
        let ctx = RequestContext::new(Some("pl".into()), "en");

        let tree = json!({"featured": {"_type": "reference", "_ref": "post-1"}});
        let out = resolver
            .resolve(&source, tree, &pending(&["post-1"]), &ctx)
            .await;
        let post = &out["featured"];
        assert_eq!(post["title"], "Cześć");
        assert_eq!(post["image"], "https://cdn.example.com/images/abc123-800x600.jpg");
        assert_eq!(post["url"], "/pl/blog/hello");
        // Second-level references are not fetched.
        assert_eq!(post["author"], json!({"_type": "reference", "_ref": "person-9"}));
        assert_eq!(source.batch_calls(), 1);
    }

    #[test]
    fn image_asset_documents_become_urls() {
        let (c, site, settings) = (classifier(), site(), SiteSettings::default());
        let resolver = ReferenceResolver::new(&c, &site, &settings);
        let asset = json!({"_type": "sanity.imageAsset", "_id": "image-ff00-10x10-png"});
        assert_eq!(
            resolver.substitute(asset, None),
            json!("https://cdn.example.com/images/ff00-10x10.png")
        );
        assert_eq!(
            resolver.image_url("image-noext-5x5"),
            "https://cdn.example.com/images/noext-5x5"
        );
    }
}
