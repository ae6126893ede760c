//! Query-language document store backend.
//!
//! Reads go to `GET {base}/v{api}/data/query/{dataset}?query=..&$param=..`
//! and come back as `{result: ...}`. Parameters are JSON-encoded.
//! Writes go to `POST {base}/v{api}/data/mutate/{dataset}`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use url::Url;

use folio_shared::{FolioError, GlobalSpec, ReferenceConfig, Result};

use crate::ContentSource;
use crate::http::{HttpFetcher, document, document_id, documents};
use crate::request::{DocumentLookup, FetchRequest};

pub struct QuerySource {
    base: Url,
    dataset: String,
    api_version: String,
    http: HttpFetcher,
}

impl QuerySource {
    pub fn new(
        base: Url,
        dataset: impl Into<String>,
        api_version: impl Into<String>,
        http: HttpFetcher,
    ) -> Self {
        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            base,
            dataset: dataset.into(),
            api_version: api_version.into(),
            http,
        }
    }

    fn endpoint(&self, action: &str) -> Result<Url> {
        let path = format!(
            "v{}/data/{action}/{}",
            self.api_version.trim_start_matches('v'),
            self.dataset
        );
        self.base
            .join(&path)
            .map_err(|e| FolioError::validation(format!("bad endpoint {path:?}: {e}")))
    }

    /// Run `query` with JSON-encoded parameters and return the `result` value.
    async fn query(&self, query: &str, params: &BTreeMap<String, Value>) -> Result<Value> {
        let mut url = self.endpoint("query")?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("query", query);
            for (name, value) in params {
                q.append_pair(&format!("${name}"), &value.to_string());
            }
        }
        let body = self.http.get_json(url).await?;
        match body {
            Value::Object(mut map) if map.contains_key("result") => {
                Ok(map.remove("result").unwrap_or(Value::Null))
            }
            other => Ok(other),
        }
    }
}

/// Build the batch projection: default fields plus per-type expansions.
///
/// `{_id, _type, "author": author->{name}}` style, with expansions guarded by
/// `_type == "<type>" => {..}` so they only apply to documents of that type.
/// `_id` and `_type` are always projected.
pub fn batch_projection(references: &ReferenceConfig) -> String {
    let mut parts: Vec<String> = references.projected_fields();
    for (doc_type, fields) in &references.expand {
        let inner = fields
            .iter()
            .map(|(field, expand)| {
                let deref = if expand.is_array { "[]->" } else { "->" };
                let picked = if expand.fields.is_empty() {
                    String::new()
                } else {
                    format!("{{{}}}", expand.fields.join(", "))
                };
                format!("\"{field}\": {field}{deref}{picked}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("_type == \"{doc_type}\" => {{{inner}}}"));
    }
    format!("{{{}}}", parts.join(", "))
}

#[async_trait]
impl ContentSource for QuerySource {
    fn name(&self) -> &str {
        "query"
    }

    #[instrument(skip_all, fields(slug = %lookup.slug))]
    async fn fetch_document(
        &self,
        lookup: &DocumentLookup,
        _language: Option<&str>,
    ) -> Result<Option<Value>> {
        let mut params = BTreeMap::from([("slug".to_string(), json!(lookup.slug))]);
        let filter = match &lookup.doc_type {
            Some(doc_type) => {
                params.insert("type".into(), json!(doc_type));
                "_type == $type && slug.current == $slug"
            }
            None => "slug.current == $slug",
        };

        // Listing queries return projections only; resolve the id first.
        let id = self
            .query(&format!("*[{filter}][0]._id"), &params)
            .await?;
        let Value::String(id) = id else {
            debug!("no document matches slug");
            return Ok(None);
        };

        let params = BTreeMap::from([("id".to_string(), json!(id))]);
        Ok(document(self.query("*[_id == $id][0]", &params).await?))
    }

    async fn fetch_global(
        &self,
        name: &str,
        spec: &GlobalSpec,
        _language: Option<&str>,
    ) -> Result<Option<Value>> {
        let result = match &spec.query {
            Some(query) => self.query(query, &BTreeMap::new()).await?,
            None => {
                let doc_type = spec.doc_type.as_deref().unwrap_or(name);
                let params = BTreeMap::from([("type".to_string(), json!(doc_type))]);
                self.query("*[_type == $type][0]", &params).await?
            }
        };
        Ok(document(result))
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
        let query = format!("*[_id in $ids]{}", batch_projection(references));
        let params = BTreeMap::from([("ids".to_string(), json!(ids))]);

        let found: HashMap<String, Value> = documents(self.query(&query, &params).await?)
            .into_iter()
            .filter_map(|doc| document_id(&doc).map(|id| (id, doc)))
            .collect();
        debug!(requested = ids.len(), found = found.len(), "batch fetched");
        Ok(found)
    }

    async fn fetch(&self, request: &FetchRequest, _language: Option<&str>) -> Result<Value> {
        match request {
            FetchRequest::Collection {
                doc_type,
                limit,
                order_by,
                filters,
                exclude_ids,
            } => {
                let mut params = BTreeMap::from([("type".to_string(), json!(doc_type))]);
                let mut conditions = vec!["_type == $type".to_string()];
                for (i, (field, value)) in filters.iter().enumerate() {
                    conditions.push(format!("{field} == $f{i}"));
                    params.insert(format!("f{i}"), json!(value));
                }
                if !exclude_ids.is_empty() {
                    conditions.push("!(_id in $exclude)".into());
                    params.insert("exclude".into(), json!(exclude_ids));
                }
                let order = order_by
                    .as_deref()
                    .map(|f| format!(" | order({f} desc)"))
                    .unwrap_or_default();
                let query = format!("*[{}]{order}[0...{limit}]", conditions.join(" && "));
                Ok(Value::Array(documents(self.query(&query, &params).await?)))
            }
            FetchRequest::Raw { query, params } => {
                let params = params
                    .iter()
                    .map(|(k, v)| (k.clone(), json!(v)))
                    .collect();
                self.query(query, &params).await
            }
        }
    }

    async fn post_mutations(&self, ops: &[Value]) -> bool {
        let url = match self.endpoint("mutate") {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build mutate endpoint");
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

#[cfg(test)]
mod tests {
    use super::*;
    use folio_shared::ExpandField;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const QUERY_PATH: &str = "/v2023-05-03/data/query/production";

    fn source(server: &MockServer) -> QuerySource {
        let http = HttpFetcher::with_token(Duration::from_secs(5), None, None).unwrap();
        QuerySource::new(
            Url::parse(&server.uri()).unwrap(),
            "production",
            "2023-05-03",
            http,
        )
    }

    #[test]
    fn projection_with_expansions() {
        let mut references = ReferenceConfig::default();
        references.expand.insert(
            "post".into(),
            BTreeMap::from([
                (
                    "author".to_string(),
                    ExpandField {
                        is_array: false,
                        fields: vec!["name".into()],
                    },
                ),
                (
                    "tags".to_string(),
                    ExpandField {
                        is_array: true,
                        fields: vec!["title".into()],
                    },
                ),
            ]),
        );
        assert_eq!(
            batch_projection(&references),
            r#"{_id, _type, slug, title, _type == "post" => {"author": author->{name}, "tags": tags[]->{title}}}"#
        );
    }

    #[test]
    fn projection_keeps_ids_when_defaults_omit_them() {
        let references = ReferenceConfig {
            default_fields: vec!["title".into()],
            ..Default::default()
        };
        assert_eq!(batch_projection(&references), "{_id, _type, title}");
    }

    #[tokio::test]
    async fn document_resolves_slug_then_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(QUERY_PATH))
            .and(query_param("$slug", "\"about\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "page-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(QUERY_PATH))
            .and(query_param("$id", "\"page-1\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"result": {"_id": "page-1", "_type": "page", "modules": []}}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let doc = source(&server)
            .fetch_document(&DocumentLookup::new("about", None), None)
            .await
            .unwrap()
            .expect("document");
        assert_eq!(doc["_id"], "page-1");
    }

    #[tokio::test]
    async fn missing_slug_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(QUERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": null})))
            .mount(&server)
            .await;

        let doc = source(&server)
            .fetch_document(&DocumentLookup::new("nope", Some("page".into())), None)
            .await
            .unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn batch_maps_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(QUERY_PATH))
            .and(query_param("$ids", r#"["doc-1","doc-2"]"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [{"_id": "doc-1", "_type": "page", "slug": {"current": "about"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ids: BTreeSet<String> = ["doc-1", "doc-2"].into_iter().map(String::from).collect();
        let found = source(&server)
            .fetch_batch(&ids, &ReferenceConfig::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["doc-1"]["slug"]["current"], "about");
    }

    #[tokio::test]
    async fn global_by_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(QUERY_PATH))
            .and(query_param("$type", "\"header\""))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"result": {"_type": "header"}})),
            )
            .mount(&server)
            .await;

        let g = source(&server)
            .fetch_global("header", &GlobalSpec::default(), None)
            .await
            .unwrap();
        assert_eq!(g, Some(json!({"_type": "header"})));
    }
}
