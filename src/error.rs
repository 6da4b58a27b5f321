//! Error types for the sharded cache.

use std::io;
use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cache facades.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration. Raised while building a facade, never retried.
    #[error("config error: {0}")]
    Config(String),

    /// The key the operation needs does not exist on the backend.
    #[error("key '{0}' not found")]
    KeyNotFound(String),

    /// Stored bytes are neither an integer nor a valid serialized payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// The increment fallback found a value with no integer meaning.
    #[error("value for key '{0}' is not numeric")]
    NotNumeric(String),

    /// The increment fallback overflowed a 64-bit integer.
    #[error("increment overflow for key '{0}'")]
    Overflow(String),

    /// The loader passed to `get_or_set` failed.
    #[error("loader failed: {0}")]
    Loader(String),

    /// Backend errors, propagated without translation.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// I/O error while writing progress output.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Errors reported by a backend connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The server could not be reached.
    #[error("backend unavailable at {addr}: {reason}")]
    Unavailable { addr: String, reason: String },

    /// Native increment rejected a value that is not an integer.
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    /// The source key of a rename does not exist.
    #[error("no such key")]
    NoSuchKey,

    /// Malformed request or reply.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<globset::Error> for BackendError {
    fn from(e: globset::Error) -> Self {
        BackendError::Protocol(e.to_string())
    }
}

impl Error {
    /// Whether this error came from the backend connection.
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::Backend(_))
    }
}
