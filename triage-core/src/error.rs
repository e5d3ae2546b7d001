//! Error types for Triage

use thiserror::Error;

use crate::retry::{Classify, ErrorClass};

/// Result type alias for Triage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Triage operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input (bad glob, untrusted change, unparsable value)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local git error
    #[error("Git error: {0}")]
    Git(String),

    /// A collaborator call failed
    #[error(transparent)]
    External(#[from] ExternalError),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Failure reported by an external collaborator (host, store, model provider)
///
/// Adapters convert their own errors into this type so the retry executor
/// and the pipeline can decide how to treat them without knowing the adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{service}: {message}")]
pub struct ExternalError {
    /// Which collaborator failed ("github", "store", "anthropic", ...)
    pub service: String,
    /// Whether retrying may help
    pub class: ErrorClass,
    /// Human-readable detail
    pub message: String,
}

impl ExternalError {
    /// A failure worth retrying (network, timeout, 5xx)
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            class: ErrorClass::Transient,
            message: message.into(),
        }
    }

    /// A failure that will not go away on retry (validation, 4xx)
    pub fn permanent(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            class: ErrorClass::Permanent,
            message: message.into(),
        }
    }

    /// Classify by HTTP status, see [`ErrorClass::from_status`]
    pub fn from_status(service: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            class: ErrorClass::from_status(status),
            message: format!("HTTP {}: {}", status, message.into()),
        }
    }
}

impl Classify for ExternalError {
    fn class(&self) -> ErrorClass {
        self.class
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ExternalError::from_status("github", 502, "bad gateway").is_transient());
        assert!(ExternalError::from_status("github", 429, "slow down").is_transient());
        assert!(!ExternalError::from_status("github", 404, "missing").is_transient());
        assert!(!ExternalError::from_status("github", 422, "invalid").is_transient());
    }

    #[test]
    fn test_display_includes_service() {
        let err = ExternalError::permanent("store", "no such table");
        assert_eq!(err.to_string(), "store: no such table");
    }
}
