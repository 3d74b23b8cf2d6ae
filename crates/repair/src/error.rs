//! Repair Error Types
//!
//! Every error here is a hard failure: the pass stops and the completion
//! flag stays unset, so the next run starts over from the first user.
//! Identity conflicts are not errors; they are reported in the
//! [`MigrationReport`](crate::MigrationReport).

use derive_more::{Display, Error};

/// A repair error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for repair operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The identity table, the cache or the completion flag could not be
    /// read or written.
    #[display("cache error")]
    Cache,
    #[display("could not enumerate users")]
    UserDirectory,
    #[display("migration failed for user {_0}")]
    User(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // A failed pass leaves nothing half done; running it again is safe.
        true
    }
}
