//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::sync::Arc;
use twin_search_sync::config::SearchSettings;
use twin_search_sync::search::{
    ActionKind, HealthMonitor, MemoryBackend, PendingAction, RetryPolicy, SearchBackend,
    SearchDocument,
};

pub const INDEX: &str = "unified";

/// Settings pointing at a syntactically valid endpoint
pub fn configured_settings() -> SearchSettings {
    SearchSettings {
        uri: Some("https://search.example.net".to_string()),
        index_name: INDEX.to_string(),
        ..Default::default()
    }
}

pub fn health() -> Arc<HealthMonitor> {
    Arc::new(HealthMonitor::new())
}

/// Backoff without waiting, so retry paths run in real time
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(3)
        .base_delay(std::time::Duration::from_millis(1))
        .max_delay(std::time::Duration::from_millis(4))
        .jitter_ratio(0.0)
        .build()
        .unwrap()
}

pub fn twin(id: &str) -> SearchDocument {
    SearchDocument::new("twin", id, 50).with_names([format!("Twin {}", id)])
}

pub fn twin_indexed_at(id: &str, at: DateTime<Utc>) -> SearchDocument {
    twin(id).with_indexed_date(at)
}

/// Backend holding the index with `docs` already stored
pub async fn seeded_backend(docs: Vec<SearchDocument>) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::with_index(INDEX));
    if !docs.is_empty() {
        let batch: Vec<_> = docs
            .into_iter()
            .map(|d| PendingAction::new(ActionKind::MergeOrUpload, d))
            .collect();
        backend.index_documents(INDEX, &batch).await.unwrap();
    }
    backend
}
