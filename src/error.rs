//! Error types for the lsmdb storage engine.

use std::io;
use thiserror::Error;

/// The result type used throughout lsmdb.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for lsmdb operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption was detected (bad checksum, malformed record, ...).
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A requested file or database was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The database is in an invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A checksum mismatch was detected.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The checksum stored on disk.
        expected: u32,
        /// The checksum computed from the data read.
        actual: u32,
    },

    /// The database or file is already in use.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The database is shutting down; in-flight work was abandoned.
    #[error("Database is shutting down")]
    ShuttingDown,

    /// A background compaction failed earlier; the engine refuses further work.
    #[error("Background compaction failed: {0}")]
    Background(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Returns true if this error reports corrupted on-disk data.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::ChecksumMismatch { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidArgument(format!("invalid JSON: {}", err))
    }
}
