//! Error types for the sqlds-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! SQLite failures are passed through untouched except for uniqueness
//! violations, which get their own variant so callers can match on them.

use rusqlite::ffi;
use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the data system.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    /// A UNIQUE or PRIMARY KEY constraint rejected the write.
    ///
    /// Carries the engine's message verbatim.
    #[error("uniqueness violation: {0}")]
    UniqueViolation(String),

    /// No user matches the supplied name and password.
    #[error("invalid credentials for user {name}")]
    InvalidCredentials { name: String },

    /// The session token does not belong to a live session.
    #[error("invalid session")]
    InvalidSession,

    /// An insert was requested without any column data.
    #[error("no data provided for insertion")]
    NoDataProvided,

    /// A table or column name failed identifier validation.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The system random source could not produce bytes.
    #[error("random source unavailable")]
    Entropy,

    /// The shared connection could not be handed out (not opened yet, or
    /// its lock was poisoned by a panicking caller).
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl StoreError {
    /// Returns `true` if this error came from a uniqueness constraint.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err
            && matches!(
                failure.extended_code,
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            )
        {
            let message = message.clone().unwrap_or_else(|| failure.to_string());
            return Self::UniqueViolation(message);
        }
        Self::Sqlite(err)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
