//! Pending document queue with batched, serialized flushes.

use crate::config::Config;
use crate::search::backend::{IndexBatchResult, SearchBackend};
use crate::search::document::{is_valid_key, ActionKind, PendingAction, SearchDocument};
use crate::search::error::{ErrorClass, SearchError, SearchResult};
use crate::search::health::{HealthMonitor, HealthState};
use crate::search::metrics::SEARCH_METRICS;
use crate::search::retry::{retry_with_backoff, RetryPolicy};
use crate::search::throttle::LogThrottle;
use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pending action count that triggers an automatic flush
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Queue length and cumulative counters after a flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushResult {
    /// Actions still waiting
    pub pending: usize,
    pub inserted: u64,
    pub deleted: u64,
    pub failed: u64,
}

/// Collects upserts and deletes and submits them to the index in batches.
///
/// Enqueueing never blocks. Flushes are serialized per queue: the task that
/// wins the gate drains everything pending into one batch. A `flush` that
/// arrives while it runs waits for it and then finds the queue already
/// drained. Counters only grow.
pub struct DocumentQueue {
    backend: Arc<dyn SearchBackend>,
    index_name: String,
    health: Arc<HealthMonitor>,
    retry: RetryPolicy,
    batch_size: usize,

    pending: SegQueue<PendingAction>,
    flush_gate: Mutex<()>,

    total_inserted: AtomicU64,
    total_deleted: AtomicU64,
    failed: AtomicU64,

    item_log: LogThrottle,
}

impl DocumentQueue {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        index_name: impl Into<String>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            backend,
            index_name: index_name.into(),
            health,
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            pending: SegQueue::new(),
            flush_gate: Mutex::new(()),
            total_inserted: AtomicU64::new(0),
            total_deleted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            item_log: LogThrottle::default(),
        }
    }

    /// Queue for the configured index with the configured batch size and
    /// retry policy
    pub fn from_config(
        backend: Arc<dyn SearchBackend>,
        config: &Config,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self::new(backend, config.search.index_name.clone(), health)
            .with_batch_size(config.queue.batch_size)
            .with_retry_policy(config.retry.to_policy())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Current counters without flushing
    pub fn stats(&self) -> FlushResult {
        FlushResult {
            pending: self.pending.len(),
            inserted: self.total_inserted.load(Ordering::SeqCst),
            deleted: self.total_deleted.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    /// Queue an upsert. Fails without queueing when the key is empty or
    /// contains characters the index rejects.
    pub async fn upload(
        &self,
        document: SearchDocument,
        cancel: &CancellationToken,
    ) -> SearchResult<()> {
        if !is_valid_key(&document.key) {
            return Err(SearchError::InvalidKey {
                operation: "upload".to_string(),
                key: document.key,
            });
        }

        self.pending
            .push(PendingAction::new(ActionKind::MergeOrUpload, document));
        self.flush_if_at_least(self.batch_size, cancel).await?;
        Ok(())
    }

    /// Queue a delete. A document without a key is logged and skipped,
    /// unlike [`upload`](Self::upload) which fails.
    pub async fn delete(
        &self,
        document: SearchDocument,
        cancel: &CancellationToken,
    ) -> SearchResult<()> {
        if document.key.is_empty() {
            warn!(
                doc_type = %document.doc_type,
                id = %document.id,
                "Skipping delete of a document without a key"
            );
            return Ok(());
        }

        self.pending
            .push(PendingAction::new(ActionKind::Delete, document));
        self.flush_if_at_least(self.batch_size, cancel).await?;
        Ok(())
    }

    /// Submit everything pending, however little.
    pub async fn flush(&self, cancel: &CancellationToken) -> SearchResult<FlushResult> {
        self.flush_if_at_least(1, cancel).await
    }

    /// Flush when at least `threshold` actions are pending; otherwise return
    /// the current counters without a remote call.
    ///
    /// A threshold of 1 always waits for any flush in flight, so the
    /// returned counters include every action queued before the call.
    ///
    /// Forbidden, missing index, exhausted retries and cancellation are
    /// returned as errors. Any other failure drops the batch, marks health
    /// unhealthy and is logged but not returned.
    pub async fn flush_if_at_least(
        &self,
        threshold: usize,
        cancel: &CancellationToken,
    ) -> SearchResult<FlushResult> {
        // Producers below the batch threshold skip the gate
        if threshold > 1 && self.pending.len() < threshold {
            return Ok(self.stats());
        }

        let _gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SearchError::Cancelled("flush".to_string())),
            gate = self.flush_gate.lock() => gate,
        };

        // Another task may have drained the queue while we waited
        if self.pending.len() < threshold.max(1) {
            return Ok(self.stats());
        }

        let batch = self.drain();
        self.submit(batch, cancel).await?;
        Ok(self.stats())
    }

    fn drain(&self) -> Vec<PendingAction> {
        let mut batch = Vec::with_capacity(self.pending.len());
        while let Some(action) = self.pending.pop() {
            batch.push(action);
        }
        batch
    }

    async fn submit(&self, batch: Vec<PendingAction>, cancel: &CancellationToken) -> SearchResult<()> {
        let started = Instant::now();
        let size = batch.len();
        debug!(index = %self.index_name, batch_size = size, "Flushing pending documents");

        let outcome = retry_with_backoff(
            &self.retry,
            &self.health,
            cancel,
            "index documents",
            || self.backend.index_documents(&self.index_name, &batch),
        )
        .await;

        let elapsed = started.elapsed();
        match outcome {
            Ok(retried) => {
                self.record_success(&batch, &retried.value);
                self.health.set(HealthState::Healthy);
                SEARCH_METRICS.flushes.with_label_values(&["success"]).inc();
                SEARCH_METRICS
                    .flush_duration
                    .with_label_values(&["success"])
                    .observe(elapsed.as_secs_f64());
                info!(
                    index = %self.index_name,
                    batch_size = size,
                    attempts = retried.attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Flushed pending documents"
                );
                Ok(())
            }
            Err(err) => self.record_failure(size, err, elapsed.as_secs_f64()),
        }
    }

    fn record_success(&self, batch: &[PendingAction], result: &IndexBatchResult) {
        let accepted = result.accepted(batch);

        let mut inserted = 0u64;
        let mut deleted = 0u64;
        let mut rejected = 0u64;
        for (action, ok) in batch.iter().zip(accepted) {
            if !ok {
                rejected += 1;
                continue;
            }
            SEARCH_METRICS
                .documents_indexed
                .with_label_values(&[&action.kind.to_string()])
                .inc();
            if action.kind.is_insert() {
                inserted += 1;
            } else {
                deleted += 1;
            }
        }

        self.total_inserted.fetch_add(inserted, Ordering::SeqCst);
        self.total_deleted.fetch_add(deleted, Ordering::SeqCst);

        if rejected > 0 {
            self.failed.fetch_add(rejected, Ordering::SeqCst);
            SEARCH_METRICS
                .documents_failed
                .with_label_values(&["Rejected"])
                .inc_by(rejected as f64);
            if let Some(suppressed) = self.item_log.ready() {
                for failure in result.failures().take(5) {
                    warn!(
                        index = %self.index_name,
                        key = %failure.key,
                        status = failure.status_code,
                        error = failure.error_message.as_deref().unwrap_or(""),
                        suppressed,
                        "Document rejected by search index"
                    );
                }
            }
        }
    }

    fn record_failure(&self, size: usize, err: SearchError, elapsed_secs: f64) -> SearchResult<()> {
        self.failed.fetch_add(size as u64, Ordering::SeqCst);
        SEARCH_METRICS
            .documents_failed
            .with_label_values(&[&err.kind().to_string()])
            .inc_by(size as f64);

        let outcome = if err.is_cancelled() { "cancelled" } else { "failed" };
        SEARCH_METRICS.flushes.with_label_values(&[outcome]).inc();
        SEARCH_METRICS
            .flush_duration
            .with_label_values(&[outcome])
            .observe(elapsed_secs);

        if err.is_cancelled() {
            warn!(index = %self.index_name, batch_size = size, "Flush cancelled, batch dropped");
            return Err(err);
        }

        match err {
            SearchError::Forbidden { .. } => {
                self.health.set(HealthState::Forbidden);
                error!(index = %self.index_name, batch_size = size, error = %err, "Search index refused the batch");
                Err(err)
            }
            _ if err.classify() == ErrorClass::Fatal => {
                self.health.set(HealthState::Unhealthy(err.reason()));
                error!(index = %self.index_name, batch_size = size, error = %err, "Failed to flush pending documents");
                Err(err)
            }
            _ => {
                // Dropped, not re-queued; the next sync run rewrites these documents
                self.health.set(HealthState::Unhealthy(err.reason()));
                error!(
                    index = %self.index_name,
                    batch_size = size,
                    error = %err,
                    "Failed to flush pending documents, batch dropped"
                );
                Ok(())
            }
        }
    }
}
