use serde_json::{Map, Value};

use folio_shared::{Module, RequestContext};
use folio_source::FetchRequest;

use super::{FetchDescriptor, ModuleProcessor};

/// Lists the latest documents of a collection under `items`.
///
/// Module fields: `collection` (default `post`), `limit` (default 3).
pub struct PostListProcessor {
    pub default_collection: String,
    pub default_limit: usize,
}

impl Default for PostListProcessor {
    fn default() -> Self {
        Self {
            default_collection: "post".into(),
            default_limit: 3,
        }
    }
}

impl ModuleProcessor for PostListProcessor {
    fn name(&self) -> &str {
        "post-list"
    }

    fn fetch_data(&self, module: &Module, _ctx: &RequestContext) -> Vec<FetchDescriptor> {
        let doc_type = module
            .fields
            .get("collection")
            .and_then(Value::as_str)
            .unwrap_or(&self.default_collection);
        let limit = module
            .fields
            .get("limit")
            .and_then(Value::as_u64)
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(self.default_limit);

        let mut request = FetchRequest::collection(doc_type, limit);
        if let FetchRequest::Collection { order_by, .. } = &mut request {
            *order_by = Some("publishedAt".into());
        }
        vec![FetchDescriptor::new("items", request)]
    }

    fn process(&self, mut module: Module, data: &Map<String, Value>, _ctx: &RequestContext) -> Module {
        let items = data
            .get("items")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        module.fields.insert("items".into(), items);
        module
    }
}
