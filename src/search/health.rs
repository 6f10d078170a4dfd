//! Last observed health of the search backend

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Operational status of the search backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    NotConfigured,
    Rebuilding,
    RateLimited,
    FailingCalls,
    Forbidden,
    MissingIndex,
    Unhealthy(String),
}

impl HealthState {
    /// Convert state to numeric value for Prometheus gauge
    pub fn to_metric_value(&self) -> f64 {
        match self {
            HealthState::Healthy => 0.0,
            HealthState::NotConfigured => 1.0,
            HealthState::Rebuilding => 2.0,
            HealthState::RateLimited => 3.0,
            HealthState::FailingCalls => 4.0,
            HealthState::Forbidden => 5.0,
            HealthState::MissingIndex => 6.0,
            HealthState::Unhealthy(_) => 7.0,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }

    /// Degraded states still serve some traffic; the rest do not.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            HealthState::NotConfigured | HealthState::Rebuilding | HealthState::RateLimited
        )
    }
}

impl Default for HealthState {
    fn default() -> Self {
        HealthState::Healthy
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::NotConfigured => write!(f, "not configured"),
            HealthState::Rebuilding => write!(f, "rebuilding"),
            HealthState::RateLimited => write!(f, "rate limited"),
            HealthState::FailingCalls => write!(f, "failing calls"),
            HealthState::Forbidden => write!(f, "forbidden"),
            HealthState::MissingIndex => write!(f, "missing index"),
            HealthState::Unhealthy(reason) => write!(f, "unhealthy: {}", reason),
        }
    }
}

static GLOBAL_HEALTH: Lazy<Arc<HealthMonitor>> = Lazy::new(|| Arc::new(HealthMonitor::new()));

/// Holds the most recent [`HealthState`].
///
/// Last write wins. Concurrent operations overwrite each other in whatever
/// order they finish, so readers should take one snapshot with [`get`] and
/// must not assume the state only ever improves.
///
/// [`get`]: HealthMonitor::get
#[derive(Debug, Default)]
pub struct HealthMonitor {
    current: RwLock<HealthState>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide monitor shared with the liveness probe
    pub fn global() -> Arc<HealthMonitor> {
        GLOBAL_HEALTH.clone()
    }

    pub fn get(&self) -> HealthState {
        self.current.read().clone()
    }

    pub fn set(&self, state: HealthState) {
        let previous = std::mem::replace(&mut *self.current.write(), state.clone());
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Search health changed");
        }
        super::metrics::SEARCH_METRICS
            .health_state
            .set(state.to_metric_value());
    }
}
