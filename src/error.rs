//! Error types for sharesync

use thiserror::Error;

/// Result type alias for sharesync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sharesync operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Absent object or path. Callers usually treat this as "never existed".
    #[error("Not found: {0}")]
    NotFound(String),

    /// Wrong entry type or argument handed to an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Known limitation that must fail loudly instead of dropping data
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// True for [`Error::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True for [`Error::Unsupported`]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }

    /// Prefix the message with what was being done when the error happened.
    ///
    /// Only string-carrying variants are rewritten; wrapped library errors are
    /// returned untouched.
    pub fn context(self, what: impl std::fmt::Display) -> Self {
        match self {
            Error::NotFound(msg) => Error::NotFound(format!("{}: {}", what, msg)),
            Error::Corruption(msg) => Error::Corruption(format!("{}: {}", what, msg)),
            Error::InvalidArgument(msg) => Error::InvalidArgument(format!("{}: {}", what, msg)),
            Error::Remote(msg) => Error::Remote(format!("{}: {}", what, msg)),
            other => other,
        }
    }
}
