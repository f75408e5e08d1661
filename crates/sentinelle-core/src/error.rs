use thiserror::Error;

/// Application-wide error types for Sentinelle.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request to an external service failed.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The analysis provider or scraper service answered with an error.
    #[error("Provider error (HTTP {status_code}): {message}")]
    ProviderError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// A circuit breaker rejected the call without reaching the provider.
    #[error("Circuit breaker '{name}' is open, retry after {retry_after_secs}s")]
    CircuitOpen { name: String, retry_after_secs: u64 },

    /// A local concurrency limit is saturated; the job should be put back
    /// and picked up again after `retry_after_secs`.
    #[error("{scope} is at capacity, retry after {retry_after_secs}s")]
    Throttled { scope: String, retry_after_secs: u64 },

    /// The dispatch guard refused the job's target. Never retried.
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// A job payload does not belong to the stage that received it,
    /// or carries values the stage cannot work with.
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// A referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The notification sink could not deliver a message.
    #[error("Notification error: {0}")]
    NotificationError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AppError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true if the queue should retry the job that produced this error.
    ///
    /// Policy violations, malformed payloads, missing records and bad
    /// configuration will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::PolicyViolation(_)
            | AppError::InvalidPayload(_)
            | AppError::NotFound { .. }
            | AppError::ConfigError(_) => false,
            AppError::ProviderError { retryable, .. } => *retryable,
            _ => true,
        }
    }

    /// Returns true if this error should trip the circuit breaker.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::ProviderError {
                status_code,
                retryable,
                ..
            } => *status_code == 429 || *status_code >= 500 || *retryable,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("connection")
            }
            _ => false,
        }
    }

    /// Delay after which a job rejected by a local limit may run again.
    ///
    /// Such jobs go back to the queue without spending an attempt.
    pub fn throttle_delay(&self) -> Option<std::time::Duration> {
        match self {
            AppError::Throttled {
                retry_after_secs, ..
            } => Some(std::time::Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }

    /// True for errors signalling that the remote side is throttling us.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            AppError::RateLimitExceeded
                | AppError::ProviderError {
                    status_code: 429,
                    ..
                }
        )
    }
}
