//! HTTP transport shared by the backends.
//!
//! Every GET goes through the [`ResponseCache`] when one is attached, keyed
//! by the fully-built URL. POSTs are never cached.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use folio_cache::ResponseCache;
use folio_shared::{FolioError, Result, SourceConfig};

/// User-Agent string for backend requests.
const USER_AGENT: &str = concat!("Folio/", env!("CARGO_PKG_VERSION"));

/// JSON client with bearer auth and response caching.
pub struct HttpFetcher {
    client: Client,
    token: Option<String>,
    cache: Option<Arc<ResponseCache>>,
}

impl HttpFetcher {
    /// Build a fetcher from `[source]`; the token is read from its env var.
    pub fn new(config: &SourceConfig, cache: Option<Arc<ResponseCache>>) -> Result<Self> {
        Self::with_token(config.timeout(), config.token(), cache)
    }

    pub fn with_token(
        timeout: Duration,
        token: Option<String>,
        cache: Option<Arc<ResponseCache>>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| FolioError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            token,
            cache,
        })
    }

    /// GET `url` and decode its JSON body, through the cache when present.
    pub async fn get_json(&self, url: Url) -> Result<Value> {
        match &self.cache {
            Some(cache) => {
                let key = cache.key_for(url.as_str());
                cache
                    .get_or_fetch(&key, None, || self.send_get(&url))
                    .await
            }
            None => self.send_get(&url).await,
        }
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn send_get(&self, url: &Url) -> Result<Value> {
        debug!("fetching");
        let mut request = self.client.get(url.as_str());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| transport_error(url, e))?;
        read_json(url, response).await
    }

    /// POST a JSON body and decode the JSON answer.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn post_json(&self, url: Url, body: &Value) -> Result<Value> {
        let mut request = self.client.post(url.as_str()).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| transport_error(&url, e))?;
        read_json(&url, response).await
    }
}

fn transport_error(url: &Url, e: reqwest::Error) -> FolioError {
    if e.is_timeout() {
        FolioError::Network(format!("{url}: request timed out"))
    } else {
        FolioError::Network(format!("{url}: {e}"))
    }
}

async fn read_json(url: &Url, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        return Err(FolioError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| FolioError::Network(format!("{url}: body read failed: {e}")))?;

    serde_json::from_str(&body).map_err(|e| FolioError::parse(format!("{url}: invalid JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Body shapes
// ---------------------------------------------------------------------------

/// Unwrap a list response: `{docs: [..]}`, `{result: [..]}`, or a bare array.
///
/// A single object counts as a one-element list; `null` as empty.
pub fn documents(body: Value) -> Vec<Value> {
    match body {
        Value::Object(mut map) => {
            if let Some(docs) = map.remove("docs") {
                return documents(docs);
            }
            if let Some(result) = map.remove("result") {
                return documents(result);
            }
            vec![Value::Object(map)]
        }
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Unwrap a single-document response: `{result: ..}`, `{docs: [first, ..]}`,
/// or a direct object. `null` and empty lists yield `None`.
pub fn document(body: Value) -> Option<Value> {
    match body {
        Value::Object(mut map) => {
            if let Some(docs) = map.remove("docs") {
                return documents(docs).into_iter().next();
            }
            if let Some(result) = map.remove("result") {
                return document(result);
            }
            Some(Value::Object(map))
        }
        Value::Array(items) => items.into_iter().next(),
        Value::Null => None,
        other => Some(other),
    }
}

/// Identifier of a document: `_id`, else `id`.
pub fn document_id(doc: &Value) -> Option<String> {
    match doc.get("_id").or_else(|| doc.get("id"))? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn list_shapes() {
        assert_eq!(documents(json!({"docs": [{"_id": "a"}]})).len(), 1);
        assert_eq!(documents(json!({"result": [{"_id": "a"}, {"_id": "b"}]})).len(), 2);
        assert_eq!(documents(json!({"result": null})).len(), 0);
        assert_eq!(documents(json!([1, 2, 3])).len(), 3);
        assert_eq!(documents(json!({"_id": "solo"})).len(), 1);
    }

    #[test]
    fn single_shapes() {
        assert_eq!(document(json!({"result": {"_id": "a"}})), Some(json!({"_id": "a"})));
        assert_eq!(document(json!({"result": null})), None);
        assert_eq!(document(json!({"docs": []})), None);
        assert_eq!(document(json!({"docs": [{"id": 1}]})), Some(json!({"id": 1})));
        assert_eq!(document(json!({"_id": "direct"})), Some(json!({"_id": "direct"})));
    }

    #[test]
    fn ids_from_either_field() {
        assert_eq!(document_id(&json!({"_id": "x"})).as_deref(), Some("x"));
        assert_eq!(document_id(&json!({"id": 42})).as_deref(), Some("42"));
        assert_eq!(document_id(&json!({"slug": "x"})), None);
    }

    #[tokio::test]
    async fn sends_bearer_token_and_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": 1})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher =
            HttpFetcher::with_token(Duration::from_secs(5), Some("secret".into()), None).unwrap();
        let base = Url::parse(&server.uri()).unwrap();

        let v = fetcher.get_json(base.join("/ok").unwrap()).await.unwrap();
        assert_eq!(v, json!({"result": 1}));

        let err = fetcher.get_json(base.join("/missing").unwrap()).await.unwrap_err();
        assert!(matches!(err, FolioError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::with_token(Duration::from_secs(5), None, None).unwrap();
        let err = fetcher
            .get_json(Url::parse(&server.uri()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::Parse { .. }));
    }

    #[tokio::test]
    async fn repeated_get_hits_network_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/pages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"docs": []})))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(ResponseCache::in_memory(Duration::from_secs(3600)));
        let fetcher =
            HttpFetcher::with_token(Duration::from_secs(5), None, Some(cache.clone())).unwrap();
        let url = Url::parse(&format!("{}/api/pages?slug=about", server.uri())).unwrap();

        fetcher.get_json(url.clone()).await.unwrap();
        fetcher.get_json(url).await.unwrap();
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::with_token(Duration::from_millis(50), None, None).unwrap();
        let err = fetcher
            .get_json(Url::parse(&server.uri()).unwrap())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
