//! REST backend for an Azure Cognitive Search compatible service.

use crate::config::SearchSettings;
use crate::search::backend::{
    IndexBatchResult, ScoredResult, SearchBackend, SearchPage, SearchRequest,
};
use crate::search::document::PendingAction;
use crate::search::error::{SearchError, SearchResult};
use crate::search::schema::{IndexSchema, SynonymMap};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Talks to the search service over HTTPS
#[derive(Clone)]
pub struct HttpSearchBackend {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    api_version: String,
}

#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    #[serde(rename = "@odata.count", default)]
    count: Option<u64>,
    #[serde(default)]
    value: Vec<Map<String, Value>>,
}

impl HttpSearchBackend {
    /// Build a backend from settings. Fails when the endpoint is unset or
    /// not an absolute URL.
    pub fn new(settings: &SearchSettings) -> SearchResult<Self> {
        let uri = settings
            .uri
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SearchError::NotConfigured("search uri is not set".to_string()))?;

        let endpoint = Url::parse(uri)
            .map_err(|e| SearchError::NotConfigured(format!("invalid search uri '{}': {}", uri, e)))?;

        let client = Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!("twin-search-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::NotConfigured(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            api_version: settings.api_version.clone(),
        })
    }

    fn url(&self, path: &str) -> SearchResult<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| SearchError::InvalidArgument(format!("invalid path '{}': {}", path, e)))
    }

    fn request(&self, method: Method, path: &str) -> SearchResult<RequestBuilder> {
        let mut request = self
            .client
            .request(method, self.url(path)?)
            .query(&[("api-version", self.api_version.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        Ok(request)
    }

    /// Send and map every non-success status to its error variant
    async fn send(&self, operation: &str, request: RequestBuilder) -> SearchResult<Response> {
        let response = request.send().await.map_err(|e| SearchError::Transport {
            operation: operation.to_string(),
            message: if e.is_timeout() {
                format!("request timed out: {}", e)
            } else {
                e.to_string()
            },
        })?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "Search backend responded");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SearchError::from_status(
            operation,
            status.as_u16(),
            if body.is_empty() {
                status.to_string()
            } else {
                body
            },
        ))
    }

    async fn json<T: serde::de::DeserializeOwned>(
        operation: &str,
        response: Response,
    ) -> SearchResult<T> {
        response.json::<T>().await.map_err(|e| {
            SearchError::Serialization(format!("{} returned an unreadable body: {}", operation, e))
        })
    }

    fn encode_batch(batch: &[PendingAction]) -> SearchResult<Value> {
        let actions = batch
            .iter()
            .map(|action| {
                let mut body = match serde_json::to_value(&action.document)? {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                body.insert(
                    "@search.action".to_string(),
                    serde_json::to_value(action.kind)?,
                );
                Ok(Value::Object(body))
            })
            .collect::<SearchResult<Vec<_>>>()?;
        Ok(serde_json::json!({ "value": actions }))
    }
}

fn decode_hit(mut raw: Map<String, Value>) -> ScoredResult<Value> {
    let score = raw
        .get("@search.score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    raw.retain(|name, _| !name.starts_with("@search."));
    ScoredResult {
        document: Value::Object(raw),
        score,
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn create_or_update_index(&self, schema: &IndexSchema) -> SearchResult<()> {
        let operation = "create or update index";
        let request = self
            .request(Method::PUT, &format!("indexes/{}", schema.name))?
            .query(&[("allowIndexDowntime", "true")])
            .json(schema);
        self.send(operation, request).await?;
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> SearchResult<()> {
        let request = self.request(Method::DELETE, &format!("indexes/{}", name))?;
        self.send("delete index", request).await?;
        Ok(())
    }

    async fn get_index(&self, name: &str) -> SearchResult<IndexSchema> {
        let operation = "get index";
        let request = self.request(Method::GET, &format!("indexes/{}", name))?;
        let response = self.send(operation, request).await?;
        Self::json(operation, response).await
    }

    async fn create_or_update_synonym_map(&self, map: &SynonymMap) -> SearchResult<()> {
        let request = self
            .request(Method::PUT, &format!("synonymmaps/{}", map.name))?
            .json(map);
        self.send("create or update synonym map", request).await?;
        Ok(())
    }

    async fn index_documents(
        &self,
        index: &str,
        batch: &[PendingAction],
    ) -> SearchResult<IndexBatchResult> {
        let operation = "index documents";
        let body = Self::encode_batch(batch)?;
        let request = self
            .request(Method::POST, &format!("indexes/{}/docs/index", index))?
            .json(&body);
        let response = self.send(operation, request).await?;

        if response.status() == StatusCode::MULTI_STATUS {
            debug!(index, batch_size = batch.len(), "Batch partially accepted");
        }
        Self::json(operation, response).await
    }

    async fn query(&self, index: &str, request: &SearchRequest) -> SearchResult<SearchPage> {
        let operation = "query";
        let http = self
            .request(Method::POST, &format!("indexes/{}/docs/search", index))?
            .json(request);
        let response = self.send(operation, http).await?;
        let raw: RawSearchResponse = Self::json(operation, response).await?;

        Ok(SearchPage {
            results: raw.value.into_iter().map(decode_hit).collect(),
            total_count: raw.count,
        })
    }
}
