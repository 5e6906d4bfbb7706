//! Error types for fan-out delivery operations.
//!
//! Separates transient failures the engine retries internally (transport
//! errors, rate limits, endpoint rejections) from input problems that fail a
//! job before any request is sent. Retryable errors never escape `deliver`;
//! they end up in per-endpoint results instead.

use std::{fmt, time::Duration};

use fanout_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions raised while delivering payloads.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level failure before a response was received.
    #[error("transport failed: {message}")]
    Transport {
        /// Error message describing the failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Endpoint asked us to slow down (HTTP 429).
    #[error("rate limited{}", format_retry_after(.retry_after))]
    RateLimited {
        /// Server-supplied minimum wait, if provided
        retry_after: Option<Duration>,
    },

    /// Endpoint answered with a status that is neither success nor 429.
    #[error("rejected by endpoint: HTTP {status_code}")]
    Rejected {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Job input failed validation.
    #[error(transparent)]
    Validation(#[from] CoreError),

    /// Engine or transport options are invalid.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(": retry after {:.3}s", delay.as_secs_f64()),
        None => String::new(),
    }
}

impl DeliveryError {
    /// Creates a transport error from a message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a rate limit error with optional retry guidance.
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited { retry_after }
    }

    /// Creates a rejection error from an HTTP response.
    pub fn rejected(status_code: u16, body: impl Into<String>) -> Self {
        Self::Rejected { status_code, body: body.into() }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(CoreError::validation(message))
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Determines if this error represents a failure worth retrying.
    ///
    /// Transport errors, timeouts, rate limits and endpoint rejections are
    /// retried within the attempt budget. Validation and configuration
    /// problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. }
            | Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::Rejected { .. } => true,

            Self::Validation(_) | Self::Configuration { .. } => false,
        }
    }

    /// Returns the server-mandated delay for rate limit errors.
    ///
    /// `None` means standard exponential backoff applies.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Returns the HTTP status associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Rejected { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

/// Category of delivery error for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Transport,
    /// Rate limiting.
    RateLimit,
    /// Non-success responses.
    Rejected,
    /// Invalid input.
    Validation,
    /// Invalid options.
    Configuration,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Transport { .. } | DeliveryError::Timeout { .. } => Self::Transport,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::Rejected { .. } => Self::Rejected,
            DeliveryError::Validation(_) => Self::Validation,
            DeliveryError::Configuration { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Rejected => write!(f, "rejected"),
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::transport("connection refused").is_retryable());
        assert!(DeliveryError::timeout(30).is_retryable());
        assert!(DeliveryError::rate_limited(Some(Duration::from_secs(2))).is_retryable());
        assert!(DeliveryError::rate_limited(None).is_retryable());
        assert!(DeliveryError::rejected(500, "boom").is_retryable());
        assert!(DeliveryError::rejected(404, "not found").is_retryable());

        assert!(!DeliveryError::validation("endpoint list is empty").is_retryable());
        assert!(!DeliveryError::configuration("zero attempts").is_retryable());
    }

    #[test]
    fn rate_limit_retry_after_extracted() {
        let error = DeliveryError::rate_limited(Some(Duration::from_millis(1500)));
        assert_eq!(error.retry_after(), Some(Duration::from_millis(1500)));
        assert_eq!(error.status_code(), Some(429));

        assert_eq!(DeliveryError::timeout(30).retry_after(), None);
        assert_eq!(DeliveryError::timeout(30).status_code(), None);
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::transport("x")), ErrorCategory::Transport);
        assert_eq!(ErrorCategory::from(&DeliveryError::timeout(1)), ErrorCategory::Transport);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::rate_limited(None)),
            ErrorCategory::RateLimit
        );
        assert_eq!(ErrorCategory::from(&DeliveryError::rejected(503, "")), ErrorCategory::Rejected);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::validation("bad")),
            ErrorCategory::Validation
        );
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(30).to_string(), "request timeout after 30s");
        assert_eq!(
            DeliveryError::rate_limited(Some(Duration::from_secs(2))).to_string(),
            "rate limited: retry after 2.000s"
        );
        assert_eq!(DeliveryError::rate_limited(None).to_string(), "rate limited");
        assert_eq!(DeliveryError::rejected(502, "").to_string(), "rejected by endpoint: HTTP 502");
        assert_eq!(
            DeliveryError::validation("duplicate endpoint").to_string(),
            "validation failed: duplicate endpoint"
        );
    }
}
