use serde_json::{Map, Value};

use folio_shared::RequestContext;
use folio_source::FetchRequest;

use super::{FetchDescriptor, PageProcessor};

/// Adds other documents of the same type under `related`.
pub struct RelatedPostsProcessor {
    pub limit: usize,
}

impl Default for RelatedPostsProcessor {
    fn default() -> Self {
        Self { limit: 3 }
    }
}

impl PageProcessor for RelatedPostsProcessor {
    fn name(&self) -> &str {
        "related-posts"
    }

    fn fetch_data(&self, page: &Value, _ctx: &RequestContext) -> Vec<FetchDescriptor> {
        let Some(doc_type) = page.get("_type").and_then(Value::as_str) else {
            return Vec::new();
        };
        let exclude_ids = page
            .get("_id")
            .or_else(|| page.get("id"))
            .and_then(Value::as_str)
            .map(|id| vec![id.to_string()])
            .unwrap_or_default();

        let request = FetchRequest::Collection {
            doc_type: doc_type.to_string(),
            limit: self.limit,
            order_by: Some("publishedAt".into()),
            filters: Default::default(),
            exclude_ids,
        };
        vec![FetchDescriptor::new("related", request)]
    }

    fn process(&self, mut page: Value, data: &Map<String, Value>, _ctx: &RequestContext) -> Value {
        if let Value::Object(fields) = &mut page {
            let related = data
                .get("related")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));
            fields.insert("related".into(), related);
        }
        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn excludes_the_page_itself() {
        let ctx = RequestContext::new(None, "en");
        let page = json!({"_id": "post-1", "_type": "post"});
        let fetches = RelatedPostsProcessor::default().fetch_data(&page, &ctx);
        match &fetches[0].request {
            FetchRequest::Collection {
                doc_type,
                exclude_ids,
                ..
            } => {
                assert_eq!(doc_type, "post");
                assert_eq!(exclude_ids, &vec!["post-1".to_string()]);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn untyped_page_needs_nothing() {
        let ctx = RequestContext::new(None, "en");
        assert!(
            RelatedPostsProcessor::default()
                .fetch_data(&json!({"title": "x"}), &ctx)
                .is_empty()
        );
    }
}
