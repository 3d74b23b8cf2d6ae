//! Scanner Error Types
//!
//! A scan talks to two collaborators: the storage backend and the cache.
//! Backend problems are split by what the caller can do about them
//! (retry later, or not), cache problems are always fatal to the scan.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A scanner error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for scan operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid scan path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// The backend could not be reached; nothing was written for the
    /// affected folder.
    #[display("storage unavailable: {_0}")]
    BackendUnavailable(#[error(not(source))] String),
    #[display("resource locked: {}", _0.display())]
    Locked(#[error(not(source))] PathBuf),
    /// Any other backend failure (permissions, unreadable target).
    #[display("storage error at {}", _0.display())]
    Backend(#[error(not(source))] PathBuf),
    /// Reading or writing the cache failed.
    #[display("cache error")]
    Cache,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::Locked(_))
    }

    /// Failures confined to one subtree. The scan records them and carries
    /// on with the siblings; only cache failures stop it.
    pub(crate) fn is_subtree_failure(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::Locked(_) | Self::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::BackendUnavailable("mock::".to_string()), true)]
    #[case(ErrorKind::Locked(PathBuf::from("docs")), true)]
    #[case(ErrorKind::Backend(PathBuf::from("docs")), false)]
    #[case(ErrorKind::Cache, false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[rstest]
    #[case(ErrorKind::BackendUnavailable("mock::".to_string()), true)]
    #[case(ErrorKind::Locked(PathBuf::from("docs")), true)]
    #[case(ErrorKind::Backend(PathBuf::from("docs")), true)]
    #[case(ErrorKind::InvalidPath(PathBuf::from("../docs")), false)]
    #[case(ErrorKind::Cache, false)]
    fn test_subtree_failure(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_subtree_failure(), expected);
    }
}
