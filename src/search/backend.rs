//! Remote search backend contract and the request/response types shared by
//! its implementations.

use crate::search::document::{ActionKind, PendingAction};
use crate::search::error::SearchResult;
use crate::search::schema::{IndexSchema, SynonymMap};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Operations the pipeline needs from a search engine.
///
/// Implementations report failures as [`SearchError`](crate::search::SearchError)
/// values whose [`kind`](crate::search::SearchError::kind) distinguishes
/// forbidden, not found, rate limited and other failures. Cancellation is the
/// caller's concern: dropping a returned future must abort the call.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn create_or_update_index(&self, schema: &IndexSchema) -> SearchResult<()>;

    async fn delete_index(&self, name: &str) -> SearchResult<()>;

    /// Fails with `NotFound` when the index does not exist
    async fn get_index(&self, name: &str) -> SearchResult<IndexSchema>;

    async fn create_or_update_synonym_map(&self, map: &SynonymMap) -> SearchResult<()>;

    async fn index_documents(
        &self,
        index: &str,
        batch: &[PendingAction],
    ) -> SearchResult<IndexBatchResult>;

    async fn query(&self, index: &str, request: &SearchRequest) -> SearchResult<SearchPage>;
}

/// Outcome for one document of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingResult {
    pub key: String,
    #[serde(rename = "status")]
    pub succeeded: bool,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Per-document outcome of a batch call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexBatchResult {
    #[serde(rename = "value", default)]
    pub results: Vec<IndexingResult>,
}

impl IndexBatchResult {
    /// Every action of `batch` accepted
    pub fn all_succeeded(batch: &[PendingAction]) -> Self {
        Self {
            results: batch
                .iter()
                .map(|action| IndexingResult {
                    key: action.document.key.clone(),
                    succeeded: true,
                    status_code: if action.kind == ActionKind::Delete { 200 } else { 201 },
                    error_message: None,
                })
                .collect(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &IndexingResult> {
        self.results.iter().filter(|r| !r.succeeded)
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.failures().map(|r| r.key.as_str()).collect()
    }

    /// Whether each action of `batch` was accepted, in batch order.
    ///
    /// The service answers one result per action in request order, so
    /// results are matched by position. A response of the wrong length is
    /// matched by key instead, which rejects every action sharing a failed key.
    pub fn accepted(&self, batch: &[PendingAction]) -> Vec<bool> {
        if self.results.len() == batch.len() {
            return self.results.iter().map(|r| r.succeeded).collect();
        }

        let failed: HashSet<&str> = self.failed_keys().into_iter().collect();
        batch
            .iter()
            .map(|action| !failed.contains(action.document.key.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryType {
    Simple,
    Full,
    Semantic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchMode {
    Any,
    All,
}

/// Nearest-neighbour criterion over an embedding field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorQuery {
    pub kind: String,
    pub vector: Vec<f32>,
    pub fields: String,
    pub k: usize,
}

impl VectorQuery {
    pub fn new(field: impl Into<String>, vector: Vec<f32>, k: usize) -> Self {
        Self {
            kind: "vector".to_string(),
            vector,
            fields: field.into(),
            k,
        }
    }
}

/// Query options. Unset fields are filled from per-type defaults by
/// [`SearchOptions::merge_defaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(rename = "top", skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_mode: Option<SearchMode>,
    #[serde(rename = "scoringProfile", skip_serializing_if = "Option::is_none")]
    pub scoring_profile: Option<String>,
    #[serde(rename = "count", skip_serializing_if = "Option::is_none")]
    pub include_total_count: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector_queries: Vec<VectorQuery>,
}

impl SearchOptions {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_search_mode(mut self, mode: SearchMode) -> Self {
        self.search_mode = Some(mode);
        self
    }

    pub fn with_total_count(mut self) -> Self {
        self.include_total_count = Some(true);
        self
    }

    pub fn with_vector_query(mut self, query: VectorQuery) -> Self {
        self.vector_queries.push(query);
        self
    }

    pub fn has_vector_queries(&self) -> bool {
        !self.vector_queries.is_empty()
    }

    /// Fill every unset field from `defaults`; values set by the caller win.
    pub fn merge_defaults(mut self, defaults: &SearchOptions) -> Self {
        self.filter = self.filter.or_else(|| defaults.filter.clone());
        self.size = self.size.or(defaults.size);
        self.skip = self.skip.or(defaults.skip);
        self.query_type = self.query_type.or(defaults.query_type);
        self.search_mode = self.search_mode.or(defaults.search_mode);
        self.scoring_profile = self
            .scoring_profile
            .or_else(|| defaults.scoring_profile.clone());
        self.include_total_count = self.include_total_count.or(defaults.include_total_count);
        self.select = self.select.or_else(|| defaults.select.clone());
        if self.vector_queries.is_empty() {
            self.vector_queries = defaults.vector_queries.clone();
        }
        self
    }
}

/// Body of a query call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(rename = "search", skip_serializing_if = "Option::is_none")]
    pub search_text: Option<String>,
    #[serde(flatten)]
    pub options: SearchOptions,
}

impl SearchRequest {
    pub fn new(search_text: Option<String>, options: SearchOptions) -> Self {
        Self {
            search_text,
            options,
        }
    }
}

/// One hit with its relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult<T> {
    pub document: T,
    pub score: f64,
}

/// One page of hits as returned by the backend
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchPage<T = serde_json::Value> {
    pub results: Vec<ScoredResult<T>>,
    /// Present when the request asked for it
    pub total_count: Option<u64>,
}

impl SearchPage<serde_json::Value> {
    /// Decode every hit into `T`.
    pub fn decode<T: DeserializeOwned>(self) -> SearchResult<SearchPage<T>> {
        let results = self
            .results
            .into_iter()
            .map(|hit| {
                Ok(ScoredResult {
                    document: serde_json::from_value(hit.document)?,
                    score: hit.score,
                })
            })
            .collect::<SearchResult<Vec<_>>>()?;
        Ok(SearchPage {
            results,
            total_count: self.total_count,
        })
    }
}

impl<T> SearchPage<T> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
