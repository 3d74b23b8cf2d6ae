//! Entry metadata returned by storage backends.
//!
//! An [`Entry`] is what a backend knows about a single file or directory at
//! the moment it was listed or stat'ed. It is not a cache record: it has no
//! id, no parent link, and fields the backend cannot report authoritatively
//! are `None`.

use crate::mimetype;
use crate::permissions::Permissions;
use std::path::{Path, PathBuf};
use time::UtcDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// File or directory metadata returned by storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Relative path from storage root (empty for the root itself)
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Size in bytes; `None` when the backend can't report it (usually
    /// directories, whose size is the sum of their children).
    pub size: Option<u64>,
    /// Modification time as reported by the backend.
    pub mtime: Option<UtcDateTime>,
    pub mimetype: String,
    pub permissions: Permissions,
    /// Backend supplied change marker, if the backend has one.
    pub etag: Option<String>,
}

impl Entry {
    /// A file entry, with its mimetype guessed from the extension.
    pub fn file(path: impl Into<PathBuf>, size: u64, mtime: UtcDateTime) -> Self {
        let path = path.into();
        Self {
            mimetype: mimetype::detect(&path).to_string(),
            path,
            kind: EntryKind::File,
            size: Some(size),
            mtime: Some(mtime),
            permissions: Permissions::ALL,
            etag: None,
        }
    }

    pub fn directory(path: impl Into<PathBuf>, mtime: Option<UtcDateTime>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            size: None,
            mtime,
            mimetype: mimetype::DIRECTORY.to_string(),
            permissions: Permissions::ALL,
            etag: None,
        }
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = mimetype.into();
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Last path component, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Whether this entry sits directly inside `dir`.
    pub fn is_child_of(&self, dir: impl AsRef<Path>) -> bool {
        self.path.parent().is_some_and(|parent| parent == dir.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_guesses_mimetype() {
        let entry = Entry::file("docs/report.pdf", 12, UtcDateTime::now());
        assert_eq!(entry.mimetype, "application/pdf");
        assert_eq!(entry.name(), Some("report.pdf"));
        assert!(!entry.is_dir());
    }

    #[test]
    fn test_directory_has_unknown_size() {
        let entry = Entry::directory("docs", None);
        assert_eq!(entry.size, None);
        assert_eq!(entry.mimetype, mimetype::DIRECTORY);
    }

    #[test]
    fn test_is_child_of() {
        let entry = Entry::file("a/b/c.txt", 1, UtcDateTime::now());
        assert!(entry.is_child_of("a/b"));
        assert!(!entry.is_child_of("a"));
        let top = Entry::file("c.txt", 1, UtcDateTime::now());
        assert!(top.is_child_of(""));
        assert!(!Entry::directory("", None).is_child_of(""));
    }
}
