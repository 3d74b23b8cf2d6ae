//! Cache Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Anything that went wrong inside SQLite itself is a
//! [`Database`](ErrorKind::Database) error with the sqlx error kept as its
//! child; the rest mean the cached rows themselves are inconsistent.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A stored value can't be converted back into its model type.
    #[display("invalid cache data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    #[display("unknown storage: {_0}")]
    StorageNotFound(#[error(not(source))] String),
    #[display("storage identifier already in use: {_0}")]
    StorageExists(#[error(not(source))] String),
    /// Cached rows still reference the storage.
    #[display("storage still has cached files: {_0}")]
    StorageInUse(#[error(not(source))] String),
    #[display("parent folder is not cached: {}", _0.display())]
    ParentNotFound(#[error(not(source))] PathBuf),
    #[display("parent is not a folder: {}", _0.display())]
    NotAFolder(#[error(not(source))] PathBuf),
    #[display("folder is not empty: {}", _0.display())]
    NotEmpty(#[error(not(source))] PathBuf),
    /// Bulk moves only ever go into a storage with no cached rows.
    #[display("target storage {_0} already has cached files")]
    TargetNotEmpty(#[error(not(source))] i64),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Busy/locked databases surface here; everything else is a logic error.
        matches!(self, Self::Database)
    }
}
