use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Network errors
    #[error("Network error: {0}")]
    Network(String),

    /// Authorization errors
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Rate limit errors
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Cancelled by the caller
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Metrics registration errors
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Network(_) => "NETWORK_ERROR",
            AppError::Authorization(_) => "AUTHORIZATION_ERROR",
            AppError::RateLimit => "RATE_LIMIT_EXCEEDED",
            AppError::Cancelled(_) => "CANCELLED",
            AppError::Metrics(_) => "METRICS_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Process exit code used by the command line
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Configuration(_) | AppError::Validation(_) => 2,
            AppError::Authorization(_) => 3,
            AppError::NotFound(_) => 4,
            AppError::RateLimit => 5,
            AppError::Cancelled(_) => 130,
            _ => 1,
        }
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Conversion from prometheus::Error
impl From<prometheus::Error> for AppError {
    fn from(err: prometheus::Error) -> Self {
        AppError::Metrics(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
