//! Config Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("config file not found: {}", _0.display())]
    FileNotFound(#[error(not(source))] PathBuf),
    /// Only TOML, YAML and JSON files are understood.
    #[display("unsupported config file format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    /// The merged sources don't deserialize into a [`Config`](crate::Config).
    #[display("could not load configuration")]
    Load,
    #[display("{_0} must be an absolute path")]
    RelativePath(#[error(not(source))] String),
    #[display("mount point {_0} is used more than once")]
    DuplicateMountPoint(#[error(not(source))] String),
    #[display("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
