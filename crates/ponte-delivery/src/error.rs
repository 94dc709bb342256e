//! Error types for sink delivery operations.
//!
//! Every failure mode of a delivery attempt is represented here, with the
//! retryable/non-retryable classification that drives the retry engine.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure modes of the delivery pipeline.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure (connection refused, DNS, reset).
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// HTTP request exceeded the configured timeout.
    ///
    /// Treated identically to a connection failure for retry purposes.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout that was exceeded, in seconds.
        timeout_seconds: u64,
    },

    /// Sink responded with a non-retryable client error (4xx other than 429).
    #[error("client error: HTTP {status_code}")]
    ClientStatus {
        /// HTTP status code.
        status_code: u16,
        /// Response body, truncated for records.
        body: String,
    },

    /// Sink responded with a server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerStatus {
        /// HTTP status code.
        status_code: u16,
        /// Response body, truncated for records.
        body: String,
    },

    /// Sink responded 429, optionally with Retry-After guidance.
    #[error("rate limited by sink")]
    RateLimited {
        /// Seconds to wait before retrying, when the sink provided them.
        retry_after_seconds: Option<u64>,
    },

    /// Invalid sink or client configuration.
    #[error("invalid delivery configuration: {message}")]
    Configuration {
        /// Configuration error description.
        message: String,
    },

    /// The bounded queue is closed; the pipeline is shutting down.
    #[error("delivery queue is closed")]
    QueueClosed,

    /// Graceful shutdown exceeded its timeout.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Configured shutdown timeout.
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {message}")]
    WorkerPanic {
        /// Id of the panicked worker.
        worker_id: usize,
        /// Join error description.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a client-status error from an HTTP response.
    pub fn client_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientStatus { status_code, body: body.into() }
    }

    /// Creates a server-status error from an HTTP response.
    pub fn server_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerStatus { status_code, body: body.into() }
    }

    /// Creates a rate-limit error.
    pub fn rate_limited(retry_after_seconds: Option<u64>) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether this failure is transient and worth retrying.
    ///
    /// Network errors, timeouts, 5xx responses, and rate limits are
    /// retryable. Other client errors and pipeline-internal conditions are
    /// not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::ServerStatus { .. }
            | Self::RateLimited { .. } => true,

            Self::ClientStatus { .. }
            | Self::Configuration { .. }
            | Self::QueueClosed
            | Self::ShutdownTimeout { .. }
            | Self::WorkerPanic { .. } => false,
        }
    }

    /// HTTP status code observed on the sink response, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientStatus { status_code, .. } | Self::ServerStatus { status_code, .. } => {
                Some(*status_code)
            },
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Sink-suggested retry delay in seconds, if one was provided.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => *retry_after_seconds,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(30).is_retryable());
        assert!(DeliveryError::server_status(503, "unavailable").is_retryable());
        assert!(DeliveryError::rate_limited(Some(60)).is_retryable());
        assert!(DeliveryError::rate_limited(None).is_retryable());

        assert!(!DeliveryError::client_status(400, "bad request").is_retryable());
        assert!(!DeliveryError::client_status(404, "not found").is_retryable());
        assert!(!DeliveryError::configuration("bad url").is_retryable());
        assert!(!DeliveryError::QueueClosed.is_retryable());
    }

    #[test]
    fn status_codes_extracted_from_status_errors() {
        assert_eq!(DeliveryError::client_status(400, "").status_code(), Some(400));
        assert_eq!(DeliveryError::server_status(503, "").status_code(), Some(503));
        assert_eq!(DeliveryError::rate_limited(None).status_code(), Some(429));
        assert_eq!(DeliveryError::timeout(30).status_code(), None);
    }

    #[test]
    fn retry_after_only_present_on_rate_limits() {
        assert_eq!(DeliveryError::rate_limited(Some(120)).retry_after_seconds(), Some(120));
        assert_eq!(DeliveryError::rate_limited(None).retry_after_seconds(), None);
        assert_eq!(DeliveryError::timeout(30).retry_after_seconds(), None);
    }

    #[test]
    fn error_display_formats() {
        assert_eq!(DeliveryError::timeout(30).to_string(), "request timeout after 30s");
        assert_eq!(
            DeliveryError::server_status(500, "boom").to_string(),
            "server error: HTTP 500"
        );
    }
}
