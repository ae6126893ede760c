//! Classification of CMS content nodes.
//!
//! Content travels through the pipeline as `serde_json::Value`. Every
//! transformation dispatches on [`NodeKind`], a closed enum, so adding a
//! payload kind forces every walker to handle it.

use serde_json::{Map, Value};

/// Type tag field on CMS objects.
pub const TYPE_FIELD: &str = "_type";
/// Reference target field.
pub const REF_FIELD: &str = "_ref";
/// Document identifier field.
pub const ID_FIELD: &str = "_id";
/// Marker contained in identifiers of unpublished drafts.
pub const DRAFT_MARKER: &str = "drafts.";

/// The payload kinds the normalizer and resolver understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// `null`.
    Null,
    /// String, number, or boolean.
    Scalar,
    /// Plain array.
    Sequence,
    /// Localized scalar: `localeString`/`localeText` or an untagged `{en, pl}` map.
    LocaleString,
    /// Per-language block arrays.
    LocaleBlockContent,
    /// Rich-text block array (tagged wrapper or bare array of `block`s).
    BlockContent,
    /// Rich text that always renders to one HTML string.
    SimpleBlockContent,
    /// Pointer to another document.
    Reference { id: String, image: bool },
    /// Image asset document.
    ImageAsset { id: String },
    /// Unpublished draft or explicitly unpublished document.
    Draft,
    /// Any other object.
    Object,
}

/// Classifies nodes against the site's languages and asset naming.
#[derive(Debug, Clone)]
pub struct Classifier {
    languages: Vec<String>,
    image_prefix: String,
}

impl Classifier {
    pub fn new(languages: Vec<String>, image_prefix: impl Into<String>) -> Self {
        Self {
            languages,
            image_prefix: image_prefix.into(),
        }
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// Whether `id` names an image asset.
    pub fn is_image_id(&self, id: &str) -> bool {
        !self.image_prefix.is_empty() && id.starts_with(&self.image_prefix)
    }

    pub fn classify(&self, value: &Value) -> NodeKind {
        match value {
            Value::Null => NodeKind::Null,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => NodeKind::Scalar,
            Value::Array(items) => {
                if is_block(items.first()) {
                    NodeKind::BlockContent
                } else {
                    NodeKind::Sequence
                }
            }
            Value::Object(map) => self.classify_object(map),
        }
    }

    fn classify_object(&self, map: &Map<String, Value>) -> NodeKind {
        if is_draft(map) {
            return NodeKind::Draft;
        }

        match map.get(TYPE_FIELD).and_then(Value::as_str) {
            Some("localeString" | "localeText") => NodeKind::LocaleString,
            Some("localeBlockContent") => NodeKind::LocaleBlockContent,
            Some("blockContent") => NodeKind::BlockContent,
            Some("simpleBlockContent") => NodeKind::SimpleBlockContent,
            Some("reference") => match map.get(REF_FIELD).and_then(Value::as_str) {
                Some(id) => NodeKind::Reference {
                    id: id.to_string(),
                    image: self.is_image_id(id),
                },
                None => NodeKind::Object,
            },
            Some("sanity.imageAsset" | "imageAsset") => NodeKind::ImageAsset {
                id: map
                    .get(ID_FIELD)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            Some(_) => match map.get(ID_FIELD).and_then(Value::as_str) {
                Some(id) if self.is_image_id(id) => NodeKind::ImageAsset { id: id.to_string() },
                _ => NodeKind::Object,
            },
            None if self.is_untagged_locale_map(map) => NodeKind::LocaleString,
            None => NodeKind::Object,
        }
    }

    /// `{en: .., pl: ..}` with no type tag and only language keys.
    fn is_untagged_locale_map(&self, map: &Map<String, Value>) -> bool {
        let mut keys = map.keys().filter(|k| k.as_str() != "_key").peekable();
        if keys.peek().is_none() {
            return false;
        }
        keys.all(|k| self.languages.iter().any(|l| l == k))
    }
}

fn is_block(first: Option<&Value>) -> bool {
    first
        .and_then(|v| v.get(TYPE_FIELD))
        .and_then(Value::as_str)
        .is_some_and(|t| t == "block")
}

fn is_draft(map: &Map<String, Value>) -> bool {
    let draft_id = map
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .is_some_and(|id| id.contains(DRAFT_MARKER));
    let unpublished = matches!(map.get("published"), Some(Value::Bool(false)));
    draft_id || unpublished
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classifier() -> Classifier {
        Classifier::new(vec!["en".into(), "pl".into()], "image-")
    }

    #[test]
    fn scalars_and_null() {
        let c = classifier();
        assert_eq!(c.classify(&json!(null)), NodeKind::Null);
        assert_eq!(c.classify(&json!("x")), NodeKind::Scalar);
        assert_eq!(c.classify(&json!(3)), NodeKind::Scalar);
        assert_eq!(c.classify(&json!(true)), NodeKind::Scalar);
    }

    #[test]
    fn locale_maps() {
        let c = classifier();
        assert_eq!(
            c.classify(&json!({"_type": "localeString", "en": "Hi"})),
            NodeKind::LocaleString
        );
        assert_eq!(c.classify(&json!({"en": "Hi", "pl": "Cześć"})), NodeKind::LocaleString);
        assert_eq!(c.classify(&json!({"en": "Hi", "de": "Hallo"})), NodeKind::Object);
        assert_eq!(c.classify(&json!({})), NodeKind::Object);
    }

    #[test]
    fn block_arrays() {
        let c = classifier();
        assert_eq!(
            c.classify(&json!([{"_type": "block", "children": []}])),
            NodeKind::BlockContent
        );
        assert_eq!(c.classify(&json!([{"_type": "hero"}])), NodeKind::Sequence);
        assert_eq!(c.classify(&json!([])), NodeKind::Sequence);
    }

    #[test]
    fn references() {
        let c = classifier();
        assert_eq!(
            c.classify(&json!({"_type": "reference", "_ref": "doc-1"})),
            NodeKind::Reference {
                id: "doc-1".into(),
                image: false
            }
        );
        assert_eq!(
            c.classify(&json!({"_type": "reference", "_ref": "image-abc-10x10-png"})),
            NodeKind::Reference {
                id: "image-abc-10x10-png".into(),
                image: true
            }
        );
    }

    #[test]
    fn drafts() {
        let c = classifier();
        assert_eq!(
            c.classify(&json!({"_id": "drafts.page-1", "_type": "page"})),
            NodeKind::Draft
        );
        assert_eq!(c.classify(&json!({"_type": "post", "published": false})), NodeKind::Draft);
        assert_eq!(c.classify(&json!({"_type": "post", "published": true})), NodeKind::Object);
    }

    #[test]
    fn image_assets() {
        let c = classifier();
        assert_eq!(
            c.classify(&json!({"_type": "sanity.imageAsset", "_id": "image-a-1x1-jpg"})),
            NodeKind::ImageAsset {
                id: "image-a-1x1-jpg".into()
            }
        );
    }
}
