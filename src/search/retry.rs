//! Backoff and retry for rate limited calls.

use crate::search::error::{ErrorClass, SearchError, SearchResult};
use crate::search::health::{HealthMonitor, HealthState};
use crate::search::metrics::SEARCH_METRICS;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Exponential backoff applied to rate limited responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap for a single delay, before jitter
    pub max_delay: Duration,
    /// Uniform jitter as a fraction of the delay, in both directions
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    /// Create a new builder for RetryPolicy
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Policy that never waits; for callers that must not block
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Validate the policy
    pub fn validate(&self) -> SearchResult<()> {
        if self.base_delay.is_zero() {
            return Err(SearchError::InvalidArgument(
                "base_delay must be greater than 0".to_string(),
            ));
        }

        if self.max_delay < self.base_delay {
            return Err(SearchError::InvalidArgument(
                "max_delay must not be shorter than base_delay".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(SearchError::InvalidArgument(
                "jitter_ratio must be in [0, 1)".to_string(),
            ));
        }

        Ok(())
    }

    /// Un-jittered delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// [`delay_for`](Self::delay_for) with jitter applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio);
        delay.mul_f64(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(64),
            jitter_ratio: 0.125,
        }
    }
}

/// Builder for RetryPolicy with fluent API
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    max_retries: Option<u32>,
    base_delay: Option<Duration>,
    max_delay: Option<Duration>,
    jitter_ratio: Option<f64>,
}

impl RetryPolicyBuilder {
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = Some(ratio);
        self
    }

    /// Build the policy
    pub fn build(self) -> SearchResult<RetryPolicy> {
        let defaults = RetryPolicy::default();
        let policy = RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            base_delay: self.base_delay.unwrap_or(defaults.base_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            jitter_ratio: self.jitter_ratio.unwrap_or(defaults.jitter_ratio),
        };
        policy.validate()?;
        Ok(policy)
    }
}

/// Value produced by [`retry_with_backoff`] plus how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    /// Calls made, including the successful one
    pub attempts: u32,
    /// Time spent sleeping between calls
    pub total_delay: Duration,
}

/// Run `f` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of retries.
///
/// Only [`ErrorClass::Retryable`] failures are retried. Health is flagged
/// `RateLimited` while waiting; the caller sets the final state. Cancellation
/// aborts both the call in flight and the wait.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    health: &HealthMonitor,
    cancel: &CancellationToken,
    operation: &str,
    mut f: F,
) -> SearchResult<Retried<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SearchResult<T>>,
{
    let mut attempts = 0u32;
    let mut total_delay = Duration::ZERO;

    loop {
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled(operation.to_string()));
        }

        attempts += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SearchError::Cancelled(operation.to_string())),
            result = f() => result,
        };

        let err = match result {
            Ok(value) => {
                if attempts > 1 {
                    warn!(operation, attempts, "Succeeded after retrying");
                } else {
                    trace!(operation, "Succeeded");
                }
                return Ok(Retried {
                    value,
                    attempts,
                    total_delay,
                });
            }
            Err(err) => err,
        };

        if err.classify() != ErrorClass::Retryable {
            return Err(err);
        }

        if attempts > policy.max_retries {
            return Err(SearchError::RetriesExhausted {
                operation: operation.to_string(),
                attempts,
                message: err.to_string(),
            });
        }

        let delay = policy.jittered_delay(attempts);
        warn!(
            operation,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Rate limited, backing off"
        );
        health.set(HealthState::RateLimited);
        SEARCH_METRICS.retries.with_label_values(&[operation]).inc();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SearchError::Cancelled(operation.to_string())),
            _ = tokio::time::sleep(delay) => {}
        }
        total_delay += delay;
    }
}

/// Await `future` unless `cancel` fires first.
pub async fn cancellable<T, Fut>(
    cancel: &CancellationToken,
    operation: &str,
    future: Fut,
) -> SearchResult<T>
where
    Fut: Future<Output = SearchResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SearchError::Cancelled(operation.to_string())),
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn rate_limited() -> SearchError {
        SearchError::from_status("test", 429, "too many requests")
    }

    #[test]
    fn test_delays_double_up_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(32));
        assert_eq!(policy.delay_for(6), Duration::from_secs(64));
        assert_eq!(policy.delay_for(40), Duration::from_secs(64));
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5 {
            let base = policy.delay_for(attempt).as_secs_f64();
            for _ in 0..50 {
                let jittered = policy.jittered_delay(attempt).as_secs_f64();
                assert!(jittered >= base * 0.875 - 1e-9, "{} < {}", jittered, base);
                assert!(jittered <= base * 1.125 + 1e-9, "{} > {}", jittered, base);
            }
        }
    }

    #[test]
    fn test_builder_validation() {
        assert!(RetryPolicy::builder().build().is_ok());
        assert!(RetryPolicy::builder()
            .base_delay(Duration::ZERO)
            .build()
            .is_err());
        assert!(RetryPolicy::builder()
            .base_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(1))
            .build()
            .is_err());
        assert!(RetryPolicy::builder().jitter_ratio(1.5).build().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let policy = RetryPolicy::builder().jitter_ratio(0.0).build().unwrap();
        let health = HealthMonitor::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let retried = retry_with_backoff(&policy, &health, &CancellationToken::new(), "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(retried.value, "done");
        assert_eq!(retried.attempts, 3);
        assert_eq!(retried.total_delay, Duration::from_secs(6));
        assert_eq!(health.get(), HealthState::RateLimited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_fatal() {
        let policy = RetryPolicy::default();
        let health = HealthMonitor::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = retry_with_backoff(&policy, &health, &CancellationToken::new(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(rate_limited()) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(matches!(err, SearchError::RetriesExhausted { attempts: 6, .. }));
        assert_eq!(err.classify(), ErrorClass::Fatal);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_return_immediately() {
        let policy = RetryPolicy::default();
        let health = HealthMonitor::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = retry_with_backoff(&policy, &health, &CancellationToken::new(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(SearchError::from_status("test", 403, "denied")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, SearchError::Forbidden { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_backoff() {
        let policy = RetryPolicy::default();
        let health = HealthMonitor::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = retry_with_backoff(&policy, &health, &cancel, "test", || async {
            Err::<(), _>(rate_limited())
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_wins_over_slow_future() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = cancellable(&cancel, "slow", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;
        assert!(result.unwrap_err().is_cancelled());

        let fresh = CancellationToken::new();
        assert_eq!(cancellable(&fresh, "fast", async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_call() {
        let policy = RetryPolicy::default();
        let health = HealthMonitor::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = retry_with_backoff(&policy, &health, &cancel, "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
