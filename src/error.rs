//! Error types
//!
//! Every failure in the crate is an [`Error`]. Callers that need to branch
//! on the kind of failure use [`Error::code`] rather than matching variants,
//! so new variants can be added without breaking them.

use thiserror::Error;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Bucket, shard group, key or index entry is absent
    NotFound,
    /// Codec failures and unexpected store errors
    Internal,
    /// Uniqueness or overlap violation
    Conflict,
    /// Caller supplied an unusable value
    Invalid,
    /// Physical shard is missing on this node although the catalog lists it
    ShardNotFound,
    /// Context cancelled or deadline exceeded
    Cancelled,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::NotFound => write!(f, "not found"),
            ErrorCode::Internal => write!(f, "internal error"),
            ErrorCode::Conflict => write!(f, "conflict"),
            ErrorCode::Invalid => write!(f, "invalid"),
            ErrorCode::ShardNotFound => write!(f, "shard not found"),
            ErrorCode::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors produced by the catalog, the write path and their collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// Requested resource does not exist
    #[error("{resource} not found: {key}")]
    NotFound { resource: &'static str, key: String },

    /// Uniqueness or overlap constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller supplied an unusable value
    #[error("Invalid: {0}")]
    Invalid(String),

    /// Storage engine has no physical shard with this id
    #[error("Shard not found: {0}")]
    ShardNotFound(crate::id::Id),

    /// Context was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Context deadline passed
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Stored bytes could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Key-value backend failure
    #[error("KV error: {0}")]
    Kv(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else that should never happen
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(resource: &'static str, key: impl ToString) -> Self {
        Error::NotFound {
            resource,
            key: key.to_string(),
        }
    }

    /// Classification used by callers to decide how to react
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NotFound { .. } => ErrorCode::NotFound,
            Error::Conflict(_) => ErrorCode::Conflict,
            Error::Invalid(_) => ErrorCode::Invalid,
            Error::ShardNotFound(_) => ErrorCode::ShardNotFound,
            Error::Cancelled | Error::DeadlineExceeded => ErrorCode::Cancelled,
            Error::Codec(_) | Error::Kv(_) | Error::Io(_) | Error::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.code() == ErrorCode::Conflict
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Kv(err.to_string())
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
