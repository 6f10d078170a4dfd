//! Prometheus metrics for the search subsystem.

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Container for all search metrics
pub struct SearchMetrics {
    /// Documents accepted by the remote index, by action
    pub documents_indexed: CounterVec,

    /// Documents in batches that failed, by failure kind
    pub documents_failed: CounterVec,

    /// Flush attempts, by outcome
    pub flushes: CounterVec,

    /// Time spent submitting a batch
    pub flush_duration: HistogramVec,

    /// Retries after a rate limited response, by operation
    pub retries: CounterVec,

    /// Queries, by outcome
    pub searches: CounterVec,

    /// Current health (see `HealthState::to_metric_value`)
    pub health_state: Gauge,
}

impl SearchMetrics {
    fn new() -> Self {
        Self {
            documents_indexed: CounterVec::new(
                Opts::new(
                    "search_documents_indexed_total",
                    "Documents accepted by the search index",
                )
                .namespace("twin_search_sync"),
                &["action"],
            )
            .expect("Failed to create search_documents_indexed_total metric"),

            documents_failed: CounterVec::new(
                Opts::new(
                    "search_documents_failed_total",
                    "Documents dropped because their batch failed",
                )
                .namespace("twin_search_sync"),
                &["kind"],
            )
            .expect("Failed to create search_documents_failed_total metric"),

            flushes: CounterVec::new(
                Opts::new("search_flushes_total", "Batch submissions to the search index")
                    .namespace("twin_search_sync"),
                &["outcome"],
            )
            .expect("Failed to create search_flushes_total metric"),

            flush_duration: HistogramVec::new(
                HistogramOpts::new(
                    "search_flush_duration_seconds",
                    "Duration of batch submissions",
                )
                .namespace("twin_search_sync")
                .buckets(vec![
                    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
                ]),
                &["outcome"],
            )
            .expect("Failed to create search_flush_duration_seconds metric"),

            retries: CounterVec::new(
                Opts::new(
                    "search_rate_limit_retries_total",
                    "Retries after a rate limited response",
                )
                .namespace("twin_search_sync"),
                &["operation"],
            )
            .expect("Failed to create search_rate_limit_retries_total metric"),

            searches: CounterVec::new(
                Opts::new("search_queries_total", "Queries run against the search index")
                    .namespace("twin_search_sync"),
                &["outcome"],
            )
            .expect("Failed to create search_queries_total metric"),

            health_state: Gauge::with_opts(
                Opts::new("search_health_state", "Last observed search health state")
                    .namespace("twin_search_sync"),
            )
            .expect("Failed to create search_health_state metric"),
        }
    }
}

lazy_static! {
    /// Global search metrics instance
    pub static ref SEARCH_METRICS: SearchMetrics = SearchMetrics::new();
}

/// Initialize search metrics with the Prometheus registry
pub fn init_search_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(SEARCH_METRICS.documents_indexed.clone()))?;
    registry.register(Box::new(SEARCH_METRICS.documents_failed.clone()))?;
    registry.register(Box::new(SEARCH_METRICS.flushes.clone()))?;
    registry.register(Box::new(SEARCH_METRICS.flush_duration.clone()))?;
    registry.register(Box::new(SEARCH_METRICS.retries.clone()))?;
    registry.register(Box::new(SEARCH_METRICS.searches.clone()))?;
    registry.register(Box::new(SEARCH_METRICS.health_state.clone()))?;
    Ok(())
}

/// Render every metric in `registry` in the Prometheus text format
pub fn gather_metrics(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        let registry = Registry::new();
        init_search_metrics(&registry).unwrap();

        SEARCH_METRICS
            .documents_indexed
            .with_label_values(&["MergeOrUpload"])
            .inc_by(3.0);
        SEARCH_METRICS.health_state.set(0.0);

        let output = gather_metrics(&registry);
        assert!(output.contains("twin_search_sync_search_documents_indexed_total"));
        assert!(output.contains("twin_search_sync_search_health_state"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        init_search_metrics(&registry).unwrap();
        assert!(init_search_metrics(&registry).is_err());
    }
}
