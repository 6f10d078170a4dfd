//! Search index management

use crate::config::SearchSettings;
use crate::search::backend::SearchBackend;
use crate::search::error::{SearchError, SearchResult};
use crate::search::health::{HealthMonitor, HealthState};
use crate::search::retry::cancellable;
use crate::search::schema::{unified_index_schema, IndexSchema, SynonymMap};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Creates, updates and inspects the unified index on the remote service
pub struct IndexSchemaManager {
    settings: SearchSettings,
    backend: Arc<dyn SearchBackend>,
    health: Arc<HealthMonitor>,
}

impl IndexSchemaManager {
    pub fn new(
        settings: SearchSettings,
        backend: Arc<dyn SearchBackend>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            settings,
            backend,
            health,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.settings.index_name
    }

    /// The schema pushed by [`create_or_update_index`](Self::create_or_update_index)
    pub fn schema(&self) -> IndexSchema {
        unified_index_schema(&self.settings.index_name)
    }

    /// Flag health `NotConfigured` and return false when the endpoint is
    /// unset or not an absolute URI.
    pub fn check_and_warn_if_no_configuration(&self) -> bool {
        if self.settings.is_configured() {
            debug!("Search endpoint is configured");
            return true;
        }

        match self.settings.uri.as_deref().map(str::trim) {
            Some(uri) if !uri.is_empty() => {
                warn!(uri, "Search endpoint is misconfigured, search will not be available")
            }
            _ => warn!("Search endpoint is not configured, search will not be available"),
        }
        self.health.set(HealthState::NotConfigured);
        false
    }

    /// Probe the index and record the outcome.
    ///
    /// Returns the state it recorded. A cancelled probe records nothing and
    /// returns the previous state.
    pub async fn check_health(&self, cancel: &CancellationToken) -> HealthState {
        info!(index = %self.settings.index_name, "Checking search index health");

        if !self.check_and_warn_if_no_configuration() {
            return HealthState::NotConfigured;
        }

        let probe = cancellable(
            cancel,
            "check health",
            self.backend.get_index(&self.settings.index_name),
        )
        .await;

        let state = match probe {
            Ok(_) => HealthState::Healthy,
            Err(SearchError::Cancelled(_)) => return self.health.get(),
            Err(SearchError::NotFound { .. }) => HealthState::MissingIndex,
            Err(err @ SearchError::Forbidden { .. }) => {
                warn!(error = %err, "Forbidden, could not access search index");
                HealthState::Forbidden
            }
            Err(err) => {
                error!(error = %err, "Failed to read search index definition");
                HealthState::FailingCalls
            }
        };

        self.health.set(state.clone());
        state
    }

    /// Push the synonym map and the index schema.
    ///
    /// A request-level rejection of the update (typically an incompatible
    /// field change) deletes the index and creates it again from the same
    /// schema. Failure of that rebuild is returned.
    pub async fn create_or_update_index(&self, cancel: &CancellationToken) -> SearchResult<()> {
        info!(index = %self.settings.index_name, "Create or update index starting");

        if cancel.is_cancelled() || !self.check_and_warn_if_no_configuration() {
            return Ok(());
        }

        let result = self.push_schema(cancel).await;
        match &result {
            Ok(()) => self.health.set(HealthState::Healthy),
            Err(err) if err.is_cancelled() => {
                warn!(index = %self.settings.index_name, "Index update cancelled")
            }
            Err(err) => {
                error!(index = %self.settings.index_name, error = %err, "Search index update failed");
                self.health.set(HealthState::Unhealthy(err.reason()));
            }
        }
        result
    }

    async fn push_schema(&self, cancel: &CancellationToken) -> SearchResult<()> {
        let synonyms = SynonymMap::unified();
        debug!(synonym_map = %synonyms.name, "Creating synonym map");
        cancellable(
            cancel,
            "create synonym map",
            self.backend.create_or_update_synonym_map(&synonyms),
        )
        .await?;

        let schema = self.schema();
        self.health.set(HealthState::Rebuilding);

        let started = Instant::now();
        let update = cancellable(
            cancel,
            "create or update index",
            self.backend.create_or_update_index(&schema),
        )
        .await;

        match update {
            Ok(()) => {
                info!(
                    index = %schema.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Search index created or updated"
                );
                Ok(())
            }
            Err(err) if err.is_request_failure() => {
                error!(index = %schema.name, error = %err, "Index update failed, deleting and rebuilding it");
                self.health.set(HealthState::Rebuilding);
                self.rebuild(&schema, cancel).await
            }
            Err(err) => Err(err),
        }
    }

    async fn rebuild(&self, schema: &IndexSchema, cancel: &CancellationToken) -> SearchResult<()> {
        let started = Instant::now();

        match cancellable(cancel, "delete index", self.backend.delete_index(&schema.name)).await {
            Ok(()) | Err(SearchError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }

        cancellable(
            cancel,
            "create index",
            self.backend.create_or_update_index(schema),
        )
        .await?;

        info!(
            index = %schema.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Search index rebuilt"
        );
        Ok(())
    }

    /// Delete the configured index. Every document in it is lost.
    pub async fn delete_index(&self, cancel: &CancellationToken) -> SearchResult<()> {
        if !self.check_and_warn_if_no_configuration() {
            return Ok(());
        }

        warn!(index = %self.settings.index_name, "Deleting search index");
        cancellable(
            cancel,
            "delete index",
            self.backend.delete_index(&self.settings.index_name),
        )
        .await?;
        self.health.set(HealthState::MissingIndex);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::memory::{CallKind, MemoryBackend};

    fn settings() -> SearchSettings {
        SearchSettings {
            uri: Some("https://search.example.net".to_string()),
            ..Default::default()
        }
    }

    fn manager(backend: &Arc<MemoryBackend>) -> (IndexSchemaManager, Arc<HealthMonitor>) {
        let health = Arc::new(HealthMonitor::new());
        (
            IndexSchemaManager::new(settings(), backend.clone(), health.clone()),
            health,
        )
    }

    #[test]
    fn test_unconfigured_endpoint() {
        let backend = Arc::new(MemoryBackend::new());
        let health = Arc::new(HealthMonitor::new());

        for uri in [None, Some(""), Some("   "), Some("search.example.net")] {
            let settings = SearchSettings {
                uri: uri.map(str::to_string),
                ..Default::default()
            };
            let manager = IndexSchemaManager::new(settings, backend.clone(), health.clone());
            health.set(HealthState::Healthy);
            assert!(!manager.check_and_warn_if_no_configuration());
            assert_eq!(health.get(), HealthState::NotConfigured);
        }
    }

    #[tokio::test]
    async fn test_create_index_happy_path() {
        let backend = Arc::new(MemoryBackend::new());
        let (manager, health) = manager(&backend);

        manager
            .create_or_update_index(&CancellationToken::new())
            .await
            .unwrap();

        assert!(backend.has_index("unified"));
        assert!(backend.has_synonym_map("unified-synonyms"));
        assert_eq!(
            backend.call_kinds(),
            vec![CallKind::CreateOrUpdateSynonymMap, CallKind::CreateOrUpdateIndex]
        );
        assert_eq!(health.get(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_not_configured_or_cancelled_is_a_no_op() {
        let backend = Arc::new(MemoryBackend::new());
        let health = Arc::new(HealthMonitor::new());
        let unconfigured =
            IndexSchemaManager::new(SearchSettings::default(), backend.clone(), health.clone());
        unconfigured
            .create_or_update_index(&CancellationToken::new())
            .await
            .unwrap();

        let (configured, _) = manager(&backend);
        let cancel = CancellationToken::new();
        cancel.cancel();
        configured.create_or_update_index(&cancel).await.unwrap();

        assert!(backend.calls().is_empty());
        assert_eq!(health.get(), HealthState::NotConfigured);
    }

    #[tokio::test]
    async fn test_second_failure_is_fatal() {
        let backend = Arc::new(MemoryBackend::with_index("unified"));
        let (manager, health) = manager(&backend);

        for _ in 0..2 {
            backend.fail_next(
                CallKind::CreateOrUpdateIndex,
                SearchError::from_status("create or update index", 400, "incompatible"),
            );
        }

        let err = manager
            .create_or_update_index(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_request_failure());
        assert!(matches!(health.get(), HealthState::Unhealthy(_)));
        assert_eq!(backend.count_calls(CallKind::DeleteIndex), 1);
    }

    #[tokio::test]
    async fn test_forbidden_update_does_not_rebuild() {
        let backend = Arc::new(MemoryBackend::with_index("unified"));
        let (manager, health) = manager(&backend);
        backend.fail_next(
            CallKind::CreateOrUpdateIndex,
            SearchError::from_status("create or update index", 403, "denied"),
        );

        assert!(manager
            .create_or_update_index(&CancellationToken::new())
            .await
            .is_err());
        assert_eq!(backend.count_calls(CallKind::DeleteIndex), 0);
        assert!(matches!(health.get(), HealthState::Unhealthy(_)));
    }

    #[tokio::test]
    async fn test_check_health_outcomes() {
        let backend = Arc::new(MemoryBackend::new());
        let (manager, health) = manager(&backend);
        let cancel = CancellationToken::new();

        assert_eq!(manager.check_health(&cancel).await, HealthState::MissingIndex);

        backend.fail_next(CallKind::GetIndex, SearchError::from_status("get index", 403, "no"));
        assert_eq!(manager.check_health(&cancel).await, HealthState::Forbidden);

        backend.fail_next(
            CallKind::GetIndex,
            SearchError::Transport {
                operation: "get index".to_string(),
                message: "connection reset".to_string(),
            },
        );
        assert_eq!(manager.check_health(&cancel).await, HealthState::FailingCalls);

        manager.create_or_update_index(&cancel).await.unwrap();
        assert_eq!(manager.check_health(&cancel).await, HealthState::Healthy);
        assert_eq!(health.get(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_delete_index() {
        let backend = Arc::new(MemoryBackend::with_index("unified"));
        let (manager, health) = manager(&backend);

        manager.delete_index(&CancellationToken::new()).await.unwrap();
        assert!(!backend.has_index("unified"));
        assert_eq!(health.get(), HealthState::MissingIndex);
    }
}
