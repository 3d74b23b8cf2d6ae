//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, the read-only contract
//! the scanner consumes to walk a storage tree one directory at a time.
//! Implementations cover the local filesystem, S3-compatible services and
//! (behind the `mock` feature) an in-memory tree for tests.

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::{S3Backend, S3Options};
use crate::entry::Entry;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub type EntryStream<'a> = Pin<Box<dyn Stream<Item = Result<Entry>> + Send + 'a>>;

/// Unified, read-only interface over a mounted storage.
///
/// # Path Handling
/// All paths are relative to the storage root; the root itself is the empty
/// path. Implementations normalize incoming paths with
/// [`normalize_path`](crate::normalize_path) and reject anything escaping
/// the root.
///
/// # Errors
/// Implementations must keep [`NotFound`](ErrorKind::NotFound) (the path
/// is gone) apart from [`Unavailable`](ErrorKind::Unavailable) (the
/// backend could not be asked). The scanner drops cached rows for the
/// first and retries the second later.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use futures::TryStreamExt;
/// use filecache_storage::{backend::StorageBackend, error::Result};
///
/// async fn total_size(backend: &dyn StorageBackend, dir: &Path) -> Result<u64> {
///     let mut total = 0;
///     let mut stream = backend.list_stream(dir);
///     while let Some(entry) = stream.try_next().await? {
///         total += entry.size.unwrap_or(0);
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (the mount's configuration key). Used
    /// for logging only.
    fn name(&self) -> &str;

    /// The storage identifier (`kind::location`) this backend is cached
    /// under, e.g. `local::/srv/data/alice/` or `home::alice`.
    fn identifier(&self) -> &str;

    /// Stream the immediate children of a directory.
    ///
    /// Yields one [`Entry`] per child, with paths relative to the storage
    /// root. A child that cannot be represented is yielded as a
    /// [`MalformedEntry`](ErrorKind::MalformedEntry) error and the stream
    /// carries on; any other error ends the listing.
    fn list_stream<'a>(&'a self, dir: &'a Path) -> EntryStream<'a>;

    /// List the immediate children of a directory.
    ///
    /// Default implementation collects [`list_stream()`](Self::list_stream)
    /// and fails on the first error of any kind.
    async fn list_directory(&self, dir: &Path) -> Result<Vec<Entry>> {
        self.list_stream(dir).try_collect().await
    }

    /// Fetch fresh metadata for a single path.
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) if the path does not exist.
    async fn stat(&self, path: &Path) -> Result<Entry>;

    /// Check whether a path exists.
    async fn exists(&self, path: &Path) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Change marker for backends that don't report one: a digest of the
/// entry's path, size and mtime.
pub(crate) fn derived_etag(path: &Path, size: Option<u64>, mtime: Option<time::UtcDateTime>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    hasher.update(&size.unwrap_or(u64::MAX).to_le_bytes());
    hasher.update(&mtime.map(|m| m.unix_timestamp()).unwrap_or(i64::MIN).to_le_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}
