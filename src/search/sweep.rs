//! Removal of documents a full re-index did not touch.
//!
//! A sync run stamps every document it uploads with the run's start time in
//! `IndexedDate`. Once the run is done, documents of that type with an older
//! stamp (or none) no longer exist upstream and are deleted.

use crate::config::SweepConfig;
use crate::search::backend::{SearchMode, SearchOptions};
use crate::search::document::{fields, SearchDocument};
use crate::search::error::{SearchError, SearchResult};
use crate::search::query::QueryBuilder;
use crate::search::queue::DocumentQueue;
use crate::search::retry::cancellable;
use crate::search::service::{SearchExecutor, FULL_TEXT_EXPRESSION};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Deletes stale documents through a [`DocumentQueue`]
pub struct StaleDocumentSweeper {
    executor: Arc<SearchExecutor<SearchDocument>>,
    queue: Arc<DocumentQueue>,
    poll_interval: Duration,
    max_polls: u32,
    page_size: usize,
}

impl StaleDocumentSweeper {
    pub fn new(
        executor: Arc<SearchExecutor<SearchDocument>>,
        queue: Arc<DocumentQueue>,
        config: &SweepConfig,
    ) -> Self {
        Self {
            executor,
            queue,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_polls: config.max_polls,
            page_size: config.page_size.max(1),
        }
    }

    /// Documents of `doc_type` stamped at or after `cutoff`
    pub fn fresh_filter(doc_type: &str, cutoff: DateTime<Utc>) -> SearchResult<String> {
        Ok(QueryBuilder::create()
            .filter_equal(fields::TYPE, doc_type)?
            .and()
            .filter_date_ge(fields::INDEXED_DATE, cutoff)?
            .get_query())
    }

    /// Documents of `doc_type` stamped before `cutoff` or never stamped
    pub fn stale_filter(doc_type: &str, cutoff: DateTime<Utc>) -> SearchResult<String> {
        Ok(QueryBuilder::create()
            .filter_equal(fields::TYPE, doc_type)?
            .and()
            .open_parenthesis()
            .filter_date_lt(fields::INDEXED_DATE, cutoff)?
            .or()
            .filter_is_null(fields::INDEXED_DATE)?
            .close_parenthesis()
            .get_query())
    }

    /// Delete every `doc_type` document indexed before `cutoff`.
    ///
    /// Flushes the queue, then waits until the index reports at least
    /// `expected_count` fresh documents of the type, so documents still in
    /// flight are not mistaken for stale ones. The first count is taken
    /// straight away; later ones are `poll_interval` apart. Gives up waiting
    /// after `max_polls` polls and sweeps anyway. Returns the number of
    /// deletes queued. A forbidden page query fails the sweep.
    pub async fn delete_documents_before(
        &self,
        doc_type: &str,
        cutoff: DateTime<Utc>,
        expected_count: u64,
        cancel: &CancellationToken,
    ) -> SearchResult<u64> {
        self.queue.flush(cancel).await?;
        self.wait_for_index(doc_type, cutoff, expected_count, cancel)
            .await?;

        let stale = Self::stale_filter(doc_type, cutoff)?;
        let mut total = 0u64;

        loop {
            let options = SearchOptions::default()
                .with_filter(stale.clone())
                .with_search_mode(SearchMode::All)
                .with_size(self.page_size);

            let page = self
                .executor
                .search_with_options(FULL_TEXT_EXPRESSION, options, cancel)
                .await?
                .ok_or_else(|| SearchError::Forbidden {
                    operation: "sweep".to_string(),
                    message: stale.clone(),
                })?;
            if page.is_empty() {
                break;
            }

            let before = self.queue.stats();
            let hits = page.len() as u64;
            for hit in page.results {
                self.queue.delete(hit.document, cancel).await?;
            }
            total += hits;
            let after = self.queue.flush(cancel).await?;

            // Deletes that did not land would come back on the next page forever
            if after.deleted - before.deleted < hits {
                warn!(
                    doc_type,
                    requested = hits,
                    deleted = after.deleted - before.deleted,
                    "Stale documents were not all deleted, stopping sweep"
                );
                break;
            }
        }

        if total > 0 {
            info!(doc_type, count = total, "Deleted stale documents");
        }
        Ok(total)
    }

    async fn wait_for_index(
        &self,
        doc_type: &str,
        cutoff: DateTime<Utc>,
        expected_count: u64,
        cancel: &CancellationToken,
    ) -> SearchResult<()> {
        let fresh = Self::fresh_filter(doc_type, cutoff)?;
        let mut polls = 0u32;

        loop {
            let actual = self.executor.count(&fresh, cancel).await?;
            if actual >= expected_count {
                return Ok(());
            }

            if polls >= self.max_polls {
                warn!(
                    doc_type,
                    actual,
                    expected = expected_count,
                    "Gave up waiting for the index to catch up"
                );
                return Ok(());
            }

            info!(
                doc_type,
                actual,
                expected = expected_count,
                "Waiting for the index to catch up"
            );
            polls += 1;

            cancellable(cancel, "sweep wait", async {
                tokio::time::sleep(self.poll_interval).await;
                Ok(())
            })
            .await?;
        }
    }
}
