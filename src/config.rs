use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::search::RetryPolicy;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote search service
    #[serde(default)]
    pub search: SearchSettings,

    /// Pending document queue
    #[serde(default)]
    pub queue: QueueConfig,

    /// Rate limit retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Stale document sweep
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("TWIN_SEARCH_CONFIG").unwrap_or_else(|_| "config/local.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Load with `config_path` as the optional file layer
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(config_path).required(false))
            // Override with environment variables (prefix: TWIN_SEARCH__)
            .add_source(
                config::Environment::with_prefix("TWIN_SEARCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Search service endpoint, e.g. `https://example.search.windows.net`.
    /// Search is disabled when this is unset or not an absolute URI.
    #[serde(default)]
    pub uri: Option<String>,

    /// Name of the unified index
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Admin or query key sent as the `api-key` header
    #[serde(default)]
    pub api_key: Option<String>,

    /// REST api-version query parameter
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Per-request timeout enforced by the HTTP client (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl SearchSettings {
    /// Whether the endpoint is set and is a well-formed absolute URI.
    pub fn is_configured(&self) -> bool {
        match self.uri.as_deref().map(str::trim) {
            Some(uri) if !uri.is_empty() => reqwest::Url::parse(uri).is_ok(),
            _ => false,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            uri: None,
            index_name: default_index_name(),
            api_key: None,
            api_version: default_api_version(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pending action count that triggers an automatic flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first rate-limited attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter as a fraction of the delay, applied in both directions
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio: self.jitter_ratio,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Wait between index count polls (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Polls before giving up on the index catching up
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    /// Stale documents fetched per query
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_polls: default_max_polls(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Register Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

fn default_index_name() -> String {
    "unified".to_string()
}

fn default_api_version() -> String {
    "2023-11-01".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_batch_size() -> usize {
    200
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    64_000
}

fn default_jitter_ratio() -> f64 {
    0.125
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_polls() -> u32 {
    60
}

fn default_page_size() -> usize {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        assert_eq!(default_batch_size(), 200);
        assert_eq!(default_max_retries(), 5);
        assert_eq!(default_base_delay_ms(), 2_000);
        assert_eq!(default_max_delay_ms(), 64_000);
        assert_eq!(default_index_name(), "unified");
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(config.search.uri.is_none());
        assert_eq!(config.queue.batch_size, 200);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.sweep.page_size, 500);
        assert!(config.observability.prometheus_enabled);
    }

    #[test]
    fn test_search_settings_configuration_check() {
        let mut settings = SearchSettings::default();
        assert!(!settings.is_configured());

        settings.uri = Some("   ".to_string());
        assert!(!settings.is_configured());

        settings.uri = Some("not a uri".to_string());
        assert!(!settings.is_configured());

        settings.uri = Some("/relative/path".to_string());
        assert!(!settings.is_configured());

        settings.uri = Some("https://example.search.windows.net".to_string());
        assert!(settings.is_configured());
    }

    #[test]
    fn test_retry_config_to_policy() {
        let policy = RetryConfig::default().to_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(64));
    }
}
