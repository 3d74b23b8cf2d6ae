//! Local filesystem storage backend.
//!
//! Lists and stats a directory tree on the local filesystem using
//! `tokio::fs`. All paths are relative to the configured root directory.

use crate::backend::{EntryStream, derived_etag};
use crate::entry::Entry;
use crate::error::{ErrorKind, Result};
use crate::path::normalize as normalize_path;
use crate::permissions::Permissions;
use crate::StorageBackend;
use async_stream::stream;
use async_trait::async_trait;
use exn::OptionExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::fs::{self, DirEntry};

/// Local filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use filecache_storage::backend::{LocalBackend, StorageBackend};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("alice", "/srv/data/alice")?;
/// assert_eq!(backend.identifier(), "local::/srv/data/alice/");
/// let home = backend.with_identifier("home::alice");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct LocalBackend {
    name: String,
    identifier: String,
    /// Root directory of the storage
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// The root must be absolute. It is created if it doesn't exist yet.
    /// The storage identifier defaults to `local::<root>/`.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Use non-async here; it'll only happen once on mount setup
            // and it's not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        let identifier = format!("local::{}/", root.to_string_lossy().trim_end_matches('/'));
        Ok(Self { name: name.into(), identifier, root })
    }

    /// Cache this backend under a different storage identifier (home
    /// storages use `home::<user>`).
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the absolute path for a relative storage path.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let normalized = normalize_path(path.as_ref())?;
        Ok(self.root.join(normalized))
    }

    /// Re-use same data collection from file metadata for both list and stat functions
    fn entry(path: &Path, metadata: &Metadata) -> Result<Entry> {
        let mtime: Option<UtcDateTime> = metadata.modified().ok().map(Into::into);
        let readonly = metadata.permissions().readonly();
        if metadata.is_dir() {
            let permissions = match readonly {
                true => Permissions::READ | Permissions::SHARE,
                false => Permissions::ALL,
            };
            return Ok(Entry::directory(path, mtime).with_permissions(permissions));
        }
        let mtime = mtime.ok_or_raise(|| ErrorKind::MalformedEntry(path.to_path_buf()))?;
        let permissions = match readonly {
            true => Permissions::ALL.difference(Permissions::UPDATE | Permissions::CREATE | Permissions::DELETE),
            false => Permissions::ALL.difference(Permissions::CREATE),
        };
        let etag = derived_etag(path, Some(metadata.len()), Some(mtime));
        Ok(Entry::file(path, metadata.len(), mtime).with_permissions(permissions).with_etag(etag))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            IoErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            IoErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            IoErrorKind::TimedOut
            | IoErrorKind::ConnectionRefused
            | IoErrorKind::ConnectionReset
            | IoErrorKind::ConnectionAborted
            | IoErrorKind::NotConnected
            | IoErrorKind::BrokenPipe => ErrorKind::Unavailable(format!("{}: {e}", path.display())),
            _ => ErrorKind::Io(e),
        }
    }

    /// Keeps the `?` operator usable for the body of the listing loop.
    ///
    /// Returns `None` for entries that are neither files nor directories
    /// (sockets, broken symlinks).
    async fn process_entry(&self, entry: DirEntry, dir: &Path) -> Result<Option<Entry>> {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            exn::bail!(ErrorKind::MalformedEntry(dir.join(&file_name)));
        };
        let relative = dir.join(name);
        let metadata = match fs::metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                tracing::debug!(path = %relative.display(), "Skipping dangling entry");
                return Ok(None);
            },
            Err(e) => exn::bail!(Self::map_io_error(e, &relative)),
        };
        if !metadata.is_dir() && !metadata.is_file() {
            return Ok(None);
        }
        Self::entry(&relative, &metadata).map(Some)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn list_stream<'a>(&'a self, dir: &'a Path) -> EntryStream<'a> {
        let dir = match normalize_path(dir) {
            Ok(dir) => dir,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        let absolute = self.root.join(&dir);

        Box::pin(stream! {
            let mut entries = match fs::read_dir(&absolute).await {
                Ok(entries) => entries,
                Err(err) => {
                    yield Err(exn::Exn::from(Self::map_io_error(err, &dir)));
                    return;
                }
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(exn::Exn::from(Self::map_io_error(e, &dir)));
                        return;
                    },
                };
                match self.process_entry(entry, &dir).await {
                    Ok(Some(entry)) => yield Ok(entry),
                    Ok(None) => {},
                    Err(e) => yield Err(e),
                }
            }
        })
    }

    async fn stat(&self, path: &Path) -> Result<Entry> {
        let relative = normalize_path(path)?;
        let absolute = self.absolute_path(&relative)?;
        let metadata = fs::metadata(&absolute).await.map_err(|e| Self::map_io_error(e, &relative))?;
        Self::entry(&relative, &metadata)
    }
}
