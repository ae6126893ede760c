//! Recursive content normalization.
//!
//! One pass over the tree that:
//! - replaces locale wrappers by the requested language's value
//! - turns block arrays into submodules or HTML
//! - records non-image reference ids for the batch fetch
//! - drops drafts, `null` fields, and `_key` bookkeeping

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use folio_shared::{BlockOutput, Classifier, NodeKind, RequestContext};

use crate::blocks::{blocks_to_submodules, convert_blocks_to_html};

/// Per-array bookkeeping field added by the CMS editor.
const KEY_FIELD: &str = "_key";

/// Walks a content tree, collecting pending reference ids as it goes.
pub struct Normalizer<'a> {
    classifier: &'a Classifier,
    language: Option<&'a str>,
    default_language: &'a str,
    block_output: BlockOutput,
    pending: BTreeSet<String>,
}

impl<'a> Normalizer<'a> {
    pub fn new(
        classifier: &'a Classifier,
        ctx: &'a RequestContext,
        block_output: BlockOutput,
    ) -> Self {
        Self {
            classifier,
            language: ctx.language.as_deref(),
            default_language: &ctx.default_language,
            block_output,
            pending: BTreeSet::new(),
        }
    }

    pub fn into_pending(self) -> BTreeSet<String> {
        self.pending
    }

    /// Normalize `value`. `None` means the node is dropped from its parent.
    pub fn normalize(&mut self, value: Value) -> Option<Value> {
        match self.classifier.classify(&value) {
            NodeKind::Null | NodeKind::Draft => None,
            NodeKind::Scalar => Some(value),
            NodeKind::Sequence => Some(self.sequence(value)),
            NodeKind::LocaleString => Some(
                self.localize(value)
                    .and_then(|v| self.normalize(v))
                    .unwrap_or_else(|| Value::String(String::new())),
            ),
            NodeKind::LocaleBlockContent => {
                let blocks = self.localize(value).map(block_list).unwrap_or_default();
                Some(self.render_blocks(blocks, self.block_output))
            }
            NodeKind::BlockContent => Some(self.render_blocks(block_list(value), self.block_output)),
            NodeKind::SimpleBlockContent => {
                Some(self.render_blocks(block_list(value), BlockOutput::Html))
            }
            NodeKind::Reference { id, image } => {
                if !image {
                    self.pending.insert(id);
                }
                Some(self.object(value))
            }
            NodeKind::ImageAsset { .. } | NodeKind::Object => Some(self.object(value)),
        }
    }

    fn sequence(&mut self, value: Value) -> Value {
        let Value::Array(items) = value else {
            return value;
        };
        Value::Array(items.into_iter().filter_map(|v| self.normalize(v)).collect())
    }

    fn object(&mut self, value: Value) -> Value {
        let Value::Object(map) = value else {
            return value;
        };
        let normalized: Map<String, Value> = map
            .into_iter()
            .filter(|(k, _)| k != KEY_FIELD)
            .filter_map(|(k, v)| self.normalize(v).map(|v| (k, v)))
            .collect();
        Value::Object(normalized)
    }

    /// Pick the requested language, else the default language.
    ///
    /// With no requested language nothing is picked and the caller falls
    /// back to an empty value.
    fn localize(&self, value: Value) -> Option<Value> {
        let language = self.language?;
        let Value::Object(mut map) = value else {
            return None;
        };
        map.remove(language)
            .filter(is_present)
            .or_else(|| map.remove(self.default_language).filter(is_present))
    }

    fn render_blocks(&mut self, blocks: Vec<Value>, output: BlockOutput) -> Value {
        match output {
            BlockOutput::Html => Value::String(convert_blocks_to_html(&blocks)),
            BlockOutput::Submodules => {
                Value::Array(blocks_to_submodules(blocks, |embed| self.normalize(embed)))
            }
        }
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Blocks of a block node: a bare array or a wrapper's `blocks` field.
fn block_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("blocks") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classifier() -> Classifier {
        Classifier::new(vec!["en".into(), "pl".into()], "image-")
    }

    fn ctx(language: Option<&str>) -> RequestContext {
        RequestContext::new(language.map(String::from), "en")
    }

    fn run(value: Value, language: Option<&str>, output: BlockOutput) -> (Option<Value>, BTreeSet<String>) {
        let c = classifier();
        let ctx = ctx(language);
        let mut n = Normalizer::new(&c, &ctx, output);
        let out = n.normalize(value);
        (out, n.into_pending())
    }

    fn text_block(text: &str) -> Value {
        json!({
            "_type": "block",
            "_key": "b1",
            "style": "normal",
            "children": [{"_type": "span", "text": text, "marks": []}],
            "markDefs": []
        })
    }

    #[test]
    fn hero_title_in_polish() {
        let page = json!({"modules": [{"type": "hero", "title": {"en": "Hi", "pl": "Cześć"}}]});
        let (out, _) = run(page, Some("pl"), BlockOutput::Submodules);
        assert_eq!(out, Some(json!({"modules": [{"type": "hero", "title": "Cześć"}]})));
    }

    #[test]
    fn locale_fallback_policy() {
        let node = json!({"_type": "localeString", "en": "Hello"});
        let (out, _) = run(node.clone(), Some("pl"), BlockOutput::Html);
        assert_eq!(out, Some(json!("Hello")));

        let (out, _) = run(json!({"_type": "localeString", "de": "Hallo"}), Some("pl"), BlockOutput::Html);
        assert_eq!(out, Some(json!("")));

        // Unset language yields the empty string, never the raw wrapper.
        let (out, _) = run(json!({"en": "A", "pl": "B"}), None, BlockOutput::Html);
        assert_eq!(out, Some(json!("")));
    }

    #[test]
    fn drafts_nulls_and_keys_are_dropped() {
        let tree = json!({
            "title": "Kept",
            "subtitle": null,
            "items": [
                {"_key": "a", "_id": "drafts.post-1", "title": "Draft"},
                {"_key": "b", "_id": "post-2", "title": "Live"},
                {"_id": "post-3", "published": false},
                null
            ]
        });
        let (out, _) = run(tree, Some("en"), BlockOutput::Html);
        assert_eq!(
            out,
            Some(json!({"title": "Kept", "items": [{"_id": "post-2", "title": "Live"}]}))
        );

        let (out, _) = run(json!({"_id": "drafts.page"}), Some("en"), BlockOutput::Html);
        assert_eq!(out, None);
    }

    #[test]
    fn collects_non_image_references() {
        let tree = json!({
            "author": {"_type": "reference", "_ref": "person-1"},
            "image": {"_type": "image", "asset": {"_type": "reference", "_ref": "image-abc-10x10-jpg"}},
            "related": [
                {"_type": "reference", "_ref": "post-2", "_key": "x"},
                {"_type": "reference", "_ref": "person-1", "_key": "y"}
            ]
        });
        let (out, pending) = run(tree, Some("en"), BlockOutput::Html);
        assert_eq!(
            pending.into_iter().collect::<Vec<_>>(),
            vec!["person-1".to_string(), "post-2".to_string()]
        );
        let out = out.unwrap();
        assert_eq!(out["related"][0], json!({"_type": "reference", "_ref": "post-2"}));
    }

    #[test]
    fn block_content_shapes() {
        let body = json!({"_type": "blockContent", "blocks": [text_block("Hi")]});
        let (out, _) = run(body.clone(), Some("en"), BlockOutput::Html);
        assert_eq!(out, Some(json!("<p>Hi</p>")));

        let (out, _) = run(body, Some("en"), BlockOutput::Submodules);
        assert_eq!(out, Some(json!([{"type": "text", "content": "<p>Hi</p>"}])));

        let simple = json!({"_type": "simpleBlockContent", "blocks": [text_block("S")]});
        let (out, _) = run(simple, Some("en"), BlockOutput::Submodules);
        assert_eq!(out, Some(json!("<p>S</p>")));
    }

    #[test]
    fn locale_block_content_picks_language_and_normalizes_embeds() {
        let node = json!({
            "_type": "localeBlockContent",
            "en": [text_block("Hello")],
            "pl": [
                text_block("Witaj"),
                {"_type": "quote", "_key": "q", "text": {"en": "Quote", "pl": "Cytat"}},
                text_block("Koniec")
            ]
        });
        let (out, _) = run(node, Some("pl"), BlockOutput::Submodules);
        assert_eq!(
            out,
            Some(json!([
                {"type": "text", "content": "<p>Witaj</p>"},
                {"type": "quote", "_type": "quote", "text": "Cytat"},
                {"type": "text", "content": "<p>Koniec</p>"}
            ]))
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let tree = json!({
            "_type": "page",
            "title": {"_type": "localeString", "en": "About", "pl": "O nas"},
            "body": [text_block("One"), {"_type": "image", "alt": {"en": "Cat"}}, text_block("Two")],
            "author": {"_type": "reference", "_ref": "person-1"},
            "draft": {"_id": "drafts.x"},
            "tags": ["a", "b"],
            "count": 3
        });
        for output in [BlockOutput::Submodules, BlockOutput::Html] {
            let (once, first) = run(tree.clone(), Some("pl"), output);
            let once = once.unwrap();
            let (twice, second) = run(once.clone(), Some("pl"), output);
            assert_eq!(twice, Some(once));
            assert_eq!(first, second);
        }
    }
}
