//! Validation errors for fan-out input.
//!
//! Raised while constructing endpoints and jobs, before any network call is
//! made. These errors are never retried.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for input validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Input failed validation.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the rejected input
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error from a message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let error = CoreError::validation("endpoint list is empty");
        assert_eq!(error.to_string(), "validation failed: endpoint list is empty");
    }
}
