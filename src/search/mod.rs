//! Synchronization of the unified search index
//!
//! This module keeps a remote full-text index consistent with upstream twins,
//! models, insights and rules, and runs queries against it:
//!
//! - **DocumentQueue**: lock-free enqueue, batched flushes serialized per queue
//! - **IndexSchemaManager**: schema, synonym map and scoring profile, with
//!   delete-and-recreate when an in-place update is rejected
//! - **SearchExecutor**: queries with per-type defaults, streamed lazily
//! - **QueryBuilder**: filter expressions that are always well formed
//! - **HealthMonitor**: last observed backend state for the liveness probe
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ ┌────────────────────┐ ┌────────────────┐
//! │ DocumentQueue│ │ IndexSchemaManager │ │ SearchExecutor │◄── QueryBuilder
//! └──────┬───────┘ └─────────┬──────────┘ └───────┬────────┘
//!        │  retry_with_backoff (429)              │
//!        ▼                   ▼                    ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        SearchBackend (HttpSearchBackend / Memory)       │
//! └─────────────────────────────────────────────────────────┘
//!        │ every outcome
//!        ▼
//!  HealthMonitor ──► liveness probe, `search_health_state` gauge
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use twin_search_sync::config::Config;
//! use twin_search_sync::search::{
//!     DocumentQueue, HealthMonitor, HttpSearchBackend, SearchDocument,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let backend = Arc::new(HttpSearchBackend::new(&config.search)?);
//!     let queue = DocumentQueue::from_config(backend, &config, HealthMonitor::global());
//!     let cancel = CancellationToken::new();
//!
//!     let doc = SearchDocument::new("twin", "AHU-01", 50).with_names(["Air Handler 1"]);
//!     queue.upload(doc, &cancel).await?;
//!     let result = queue.flush(&cancel).await?;
//!     println!("inserted {} documents", result.inserted);
//!
//!     Ok(())
//! }
//! ```

mod backend;
mod document;
mod error;
mod health;
mod http;
mod index;
mod memory;
mod metrics;
mod query;
mod queue;
mod retry;
mod schema;
mod service;
mod sweep;
mod throttle;

pub use backend::{
    IndexBatchResult, IndexingResult, QueryType, ScoredResult, SearchBackend, SearchMode,
    SearchOptions, SearchPage, SearchRequest, VectorQuery,
};
pub use document::{
    fields, is_valid_key, model_without_fluff, ActionKind, PendingAction, SearchDocument,
};
pub use error::{ErrorClass, FailureKind, SearchError, SearchResult};
pub use health::{HealthMonitor, HealthState};
pub use http::HttpSearchBackend;
pub use index::IndexSchemaManager;
pub use memory::{BackendCall, CallKind, MemoryBackend};
pub use metrics::{gather_metrics, init_search_metrics, SearchMetrics, SEARCH_METRICS};
pub use query::{Comparison, Literal, QueryBuilder, QueryToken, SEARCH_IN_DELIMITER};
pub use queue::{DocumentQueue, FlushResult, DEFAULT_BATCH_SIZE};
pub use retry::{cancellable, retry_with_backoff, Retried, RetryPolicy, RetryPolicyBuilder};
pub use schema::{
    unified_index_schema, CustomAnalyzer, FieldType, FunctionAggregation, IndexSchema,
    ScoringFunction, ScoringProfile, SearchField, Suggester, SynonymMap, SCORING_PROFILE_NAME,
    SUGGESTER_NAME, SYNONYM_MAP_NAME,
};
pub use service::{SearchExecutor, Searchable, FULL_TEXT_EXPRESSION};
pub use sweep::StaleDocumentSweeper;
pub use throttle::LogThrottle;
