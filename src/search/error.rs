//! Error types for search operations

use crate::error::AppError;
use serde::{Deserialize, Serialize};

/// Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Remote failure category, as far as the backend contract distinguishes them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum FailureKind {
    Forbidden,
    NotFound,
    RateLimited,
    Other,
}

/// How callers should react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorClass {
    /// Transient; retry with backoff
    Retryable,
    /// Stop and propagate
    Fatal,
    /// Log, flag health, carry on where the operation allows it
    Ignorable,
}

/// Errors that can occur during search operations
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Search endpoint missing or malformed
    #[error("Search is not configured: {0}")]
    NotConfigured(String),

    /// Document key rejected before it reached the queue
    #[error("Invalid document key '{key}' for {operation}")]
    InvalidKey { operation: String, key: String },

    /// Bad caller input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 403 from the backend
    #[error("{operation} forbidden: {message}")]
    Forbidden { operation: String, message: String },

    /// 404 from the backend
    #[error("{operation} target not found: {message}")]
    NotFound { operation: String, message: String },

    /// 429 from the backend
    #[error("{operation} rate limited: {message}")]
    RateLimited { operation: String, message: String },

    /// Still rate limited after every retry
    #[error("{operation} still rate limited after {attempts} attempts: {message}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Any other non-success response
    #[error("{operation} failed with status {status}: {message}")]
    RequestFailed {
        operation: String,
        status: u16,
        message: String,
    },

    /// Connection, TLS or timeout failure before a response arrived
    #[error("{operation} transport error: {message}")]
    Transport { operation: String, message: String },

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Caller cancelled the operation
    #[error("{0} cancelled")]
    Cancelled(String),
}

impl SearchError {
    /// Map an HTTP status to the matching error variant.
    pub fn from_status(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let operation = operation.into();
        let message = message.into();
        match status {
            403 => SearchError::Forbidden { operation, message },
            404 => SearchError::NotFound { operation, message },
            429 => SearchError::RateLimited { operation, message },
            _ => SearchError::RequestFailed {
                operation,
                status,
                message,
            },
        }
    }

    /// Remote failure category
    pub fn kind(&self) -> FailureKind {
        match self {
            SearchError::Forbidden { .. } => FailureKind::Forbidden,
            SearchError::NotFound { .. } => FailureKind::NotFound,
            SearchError::RateLimited { .. } | SearchError::RetriesExhausted { .. } => {
                FailureKind::RateLimited
            }
            _ => FailureKind::Other,
        }
    }

    /// Classification consumed by the retry combinator and the queue
    pub fn classify(&self) -> ErrorClass {
        match self {
            SearchError::RateLimited { .. } => ErrorClass::Retryable,
            SearchError::Forbidden { .. }
            | SearchError::NotFound { .. }
            | SearchError::RetriesExhausted { .. }
            | SearchError::InvalidKey { .. }
            | SearchError::InvalidArgument(_)
            | SearchError::Cancelled(_) => ErrorClass::Fatal,
            SearchError::NotConfigured(_)
            | SearchError::RequestFailed { .. }
            | SearchError::Transport { .. }
            | SearchError::Serialization(_) => ErrorClass::Ignorable,
        }
    }

    /// A response-level rejection such as a schema conflict, as opposed to
    /// an authorization, missing-resource or rate-limit answer.
    pub fn is_request_failure(&self) -> bool {
        matches!(self, SearchError::RequestFailed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchError::Cancelled(_))
    }

    /// Short reason used for `Unhealthy` health states
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::NotConfigured(msg) => AppError::Configuration(msg),
            SearchError::InvalidKey { .. } | SearchError::InvalidArgument(_) => {
                AppError::Validation(err.to_string())
            }
            SearchError::Forbidden { .. } => AppError::Authorization(err.to_string()),
            SearchError::NotFound { .. } => AppError::NotFound(err.to_string()),
            SearchError::RateLimited { .. } | SearchError::RetriesExhausted { .. } => {
                AppError::RateLimit
            }
            SearchError::Transport { .. } => AppError::Network(err.to_string()),
            SearchError::Serialization(msg) => AppError::Serialization(msg),
            SearchError::Cancelled(op) => AppError::Cancelled(op),
            SearchError::RequestFailed { .. } => AppError::Internal(err.to_string()),
        }
    }
}
