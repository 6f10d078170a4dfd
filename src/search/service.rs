//! Query execution against the unified index

use crate::config::SearchSettings;
use crate::search::backend::{
    QueryType, ScoredResult, SearchBackend, SearchMode, SearchOptions, SearchPage, SearchRequest,
};
use crate::search::document::SearchDocument;
use crate::search::error::{SearchError, SearchResult};
use crate::search::health::{HealthMonitor, HealthState};
use crate::search::metrics::SEARCH_METRICS;
use crate::search::retry::{retry_with_backoff, RetryPolicy};
use crate::search::schema::SCORING_PROFILE_NAME;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Search text matching every document
pub const FULL_TEXT_EXPRESSION: &str = "*";

/// A payload that can be searched for, with the options applied when the
/// caller leaves them unset
pub trait Searchable: DeserializeOwned + Default + Send + 'static {
    fn default_options() -> SearchOptions {
        SearchOptions::default()
    }
}

impl Searchable for SearchDocument {
    fn default_options() -> SearchOptions {
        SearchOptions {
            size: Some(50),
            query_type: Some(QueryType::Full),
            search_mode: Some(SearchMode::All),
            scoring_profile: Some(SCORING_PROFILE_NAME.to_string()),
            include_total_count: Some(true),
            ..Default::default()
        }
    }
}

impl Searchable for serde_json::Value {}

/// Runs queries for payload type `T`
pub struct SearchExecutor<T: Searchable> {
    settings: SearchSettings,
    backend: Arc<dyn SearchBackend>,
    health: Arc<HealthMonitor>,
    retry: RetryPolicy,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Searchable> SearchExecutor<T> {
    pub fn new(
        settings: SearchSettings,
        backend: Arc<dyn SearchBackend>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            settings,
            backend,
            health,
            retry: RetryPolicy::default(),
            _payload: PhantomData,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stream up to `size` hits for `input`.
    ///
    /// Nothing is sent until the stream is first polled. When search is not
    /// configured the stream yields a single default-valued placeholder with
    /// score 0. A forbidden query yields a single `Forbidden` error item in
    /// place of results.
    pub fn search(
        &self,
        input: impl Into<String>,
        size: usize,
        cancel: CancellationToken,
    ) -> BoxStream<'_, SearchResult<ScoredResult<T>>> {
        if !self.settings.is_configured() {
            warn!("Search is not configured, returning a placeholder result");
            self.health.set(HealthState::NotConfigured);
            return stream::iter(vec![Ok(ScoredResult {
                document: T::default(),
                score: 0.0,
            })])
            .boxed();
        }

        let input = input.into();
        let options = SearchOptions::default().with_size(size);
        stream::once(async move { self.search_with_options(&input, options, &cancel).await })
            .flat_map(|outcome| {
                let items: Vec<SearchResult<ScoredResult<T>>> = match outcome {
                    Ok(Some(page)) => page.results.into_iter().map(Ok).collect(),
                    Ok(None) => vec![Err(SearchError::Forbidden {
                        operation: "search".to_string(),
                        message: "query returned no result set".to_string(),
                    })],
                    Err(err) => vec![Err(err)],
                };
                stream::iter(items)
            })
            .boxed()
    }

    /// Run one query. `input` may be empty only when `options` carries a
    /// vector query. Unset options are filled from `T::default_options()`.
    ///
    /// Returns `Ok(None)` when the service refuses access; health is then
    /// `Forbidden`. Any other failure is returned and flags `FailingCalls`.
    pub async fn search_with_options(
        &self,
        input: &str,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> SearchResult<Option<SearchPage<T>>> {
        if input.trim().is_empty() && !options.has_vector_queries() {
            return Err(SearchError::InvalidArgument(
                "search needs input text or a vector query".to_string(),
            ));
        }

        if !self.settings.is_configured() {
            self.health.set(HealthState::NotConfigured);
            return Err(SearchError::NotConfigured(
                "search uri is not set or invalid".to_string(),
            ));
        }

        let request = SearchRequest::new(
            Some(input.trim().to_string()).filter(|t| !t.is_empty()),
            options.merge_defaults(&T::default_options()),
        );
        debug!(index = %self.settings.index_name, request = ?request, "Running search");

        let outcome = retry_with_backoff(&self.retry, &self.health, cancel, "search", || {
            self.backend.query(&self.settings.index_name, &request)
        })
        .await
        .and_then(|retried| retried.value.decode::<T>());

        match outcome {
            Ok(page) => {
                SEARCH_METRICS.searches.with_label_values(&["success"]).inc();
                self.health.set(HealthState::Healthy);
                Ok(Some(page))
            }
            Err(err @ SearchError::Forbidden { .. }) => {
                SEARCH_METRICS.searches.with_label_values(&["forbidden"]).inc();
                warn!(index = %self.settings.index_name, error = %err, "Search forbidden");
                self.health.set(HealthState::Forbidden);
                Ok(None)
            }
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                SEARCH_METRICS.searches.with_label_values(&["failed"]).inc();
                error!(index = %self.settings.index_name, error = %err, "Search failed");
                self.health.set(HealthState::FailingCalls);
                Err(err)
            }
        }
    }

    /// Number of documents matching `filter`
    pub async fn count(&self, filter: &str, cancel: &CancellationToken) -> SearchResult<u64> {
        let options = SearchOptions {
            filter: Some(filter.to_string()).filter(|f| !f.trim().is_empty()),
            size: Some(1),
            search_mode: Some(SearchMode::All),
            include_total_count: Some(true),
            ..Default::default()
        };

        match self
            .search_with_options(FULL_TEXT_EXPRESSION, options, cancel)
            .await?
        {
            Some(page) => Ok(page.total_count.unwrap_or(0)),
            None => Err(SearchError::Forbidden {
                operation: "count".to_string(),
                message: filter.to_string(),
            }),
        }
    }
}
