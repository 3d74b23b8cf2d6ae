//! Storage Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Backends must keep "this path does not exist" apart
//! from "the backend could not be reached": the scanner removes cache rows
//! for the former and retries the latter on a later pass.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File or directory does not exist
    #[display("not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// The backend could not be reached (network, stale mount, throttling).
    #[display("storage unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains invalid characters or escapes root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// A listing returned an entry that cannot be represented (bad name,
    /// unexpected parent, non-UTF8 bytes).
    #[display("malformed entry: {}", _0.display())]
    MalformedEntry(#[error(not(source))] PathBuf),
    /// A lock on the path is held elsewhere.
    #[display("resource locked: {}", _0.display())]
    Locked(#[error(not(source))] PathBuf),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_) | Self::Locked(_))
    }
}
