//! Error types for database operations

use thiserror::Error;
use triage_core::retry::{Classify, ErrorClass};
use triage_core::ExternalError;

/// Database error types
#[derive(Error, Debug)]
pub enum Error {
    /// SQLx database error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Stored data does not fit the expected shape
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, Error>;

impl Classify for Error {
    fn class(&self) -> ErrorClass {
        match self {
            Error::Sqlx(sqlx::Error::Database(db)) => {
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes
                let busy = db
                    .code()
                    .and_then(|c| c.parse::<i32>().ok())
                    .map(|c| matches!(c & 0xff, 5 | 6))
                    .unwrap_or(false);
                if busy {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            Error::Sqlx(sqlx::Error::PoolTimedOut)
            | Error::Sqlx(sqlx::Error::PoolClosed)
            | Error::Sqlx(sqlx::Error::Io(_))
            | Error::Io(_) => ErrorClass::Transient,
            Error::Sqlx(_) | Error::Migration(_) | Error::InvalidData(_) => ErrorClass::Permanent,
        }
    }
}

impl From<Error> for ExternalError {
    fn from(err: Error) -> Self {
        ExternalError {
            service: "store".to_string(),
            class: err.class(),
            message: err.to_string(),
        }
    }
}
