//! Error types for GitHub operations

use thiserror::Error;
use triage_core::retry::{Classify, ErrorClass};
use triage_core::ExternalError;

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during GitHub operations
#[derive(Error, Debug)]
pub enum Error {
    /// GitHub API error
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    /// Raw HTTP request failed before a response arrived
    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response to a raw HTTP request
    #[error("GitHub returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Authentication error
    #[error("GitHub authentication error: {0}")]
    Auth(String),

    /// Pull request not found
    #[error("Pull request #{0} not found")]
    PrNotFound(u64),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Classify for Error {
    fn class(&self) -> ErrorClass {
        match self {
            Error::Api(octocrab::Error::GitHub { source, .. }) => {
                ErrorClass::from_status(source.status_code.as_u16())
            }
            // Transport, hyper and serde failures inside octocrab
            Error::Api(_) => ErrorClass::Transient,
            Error::Http(e) => match e.status() {
                Some(status) => ErrorClass::from_status(status.as_u16()),
                None if e.is_decode() || e.is_builder() => ErrorClass::Permanent,
                None => ErrorClass::Transient,
            },
            Error::Status { status, .. } => ErrorClass::from_status(*status),
            Error::Auth(_) | Error::PrNotFound(_) | Error::Parse(_) => ErrorClass::Permanent,
        }
    }
}

impl From<Error> for ExternalError {
    fn from(err: Error) -> Self {
        ExternalError {
            service: "github".to_string(),
            class: err.class(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_errors() {
        let err = Error::Status {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());

        let err = Error::Status {
            status: 404,
            message: "missing".into(),
        };
        assert!(!err.is_transient());

        let err = Error::Status {
            status: 429,
            message: "rate limited".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_conversion_keeps_class() {
        let external: ExternalError = Error::PrNotFound(7).into();
        assert_eq!(external.service, "github");
        assert_eq!(external.class, ErrorClass::Permanent);
        assert!(external.message.contains("#7"));
    }
}
