use crate::error::{Error, ErrorKind, Result};
use crate::models::{StorageId, from_timestamp, to_timestamp};
use exn::ResultExt;
use filecache_storage::{Permissions, mimetype};
use std::path::PathBuf;
use time::UtcDateTime;

/// Cached metadata of one file or folder in a storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub storage: StorageId,
    /// Path relative to the storage root; empty for the root.
    pub path: PathBuf,
    /// Id of the containing folder's record; `None` only for the root.
    pub parent: Option<i64>,
    pub name: String,
    /// `None` marks a folder that hasn't been fully scanned.
    pub size: Option<u64>,
    pub mtime: UtcDateTime,
    /// Modification time as last seen on the backend. The scanner compares
    /// it against fresh listings to decide whether cached data is reusable.
    pub storage_mtime: UtcDateTime,
    pub etag: String,
    pub mimetype: String,
    pub permissions: Permissions,
    pub encrypted: bool,
}
impl FileRecord {
    pub fn is_dir(&self) -> bool {
        self.mimetype == mimetype::DIRECTORY
    }

    pub fn is_incomplete(&self) -> bool {
        self.is_dir() && self.size.is_none()
    }

    pub fn attributes(&self) -> FileAttributes {
        FileAttributes {
            size: self.size,
            mtime: self.mtime,
            storage_mtime: self.storage_mtime,
            etag: self.etag.clone(),
            mimetype: self.mimetype.clone(),
            permissions: self.permissions,
            encrypted: self.encrypted,
        }
    }
}

/// Everything [`FileCache::put`](crate::FileCache::put) writes. Identity
/// (storage, path, parent, name) comes from where the record is put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttributes {
    pub size: Option<u64>,
    pub mtime: UtcDateTime,
    pub storage_mtime: UtcDateTime,
    pub etag: String,
    pub mimetype: String,
    pub permissions: Permissions,
    pub encrypted: bool,
}
impl FileAttributes {
    /// Placeholder for a folder that exists but hasn't been scanned.
    pub fn incomplete_folder() -> Self {
        Self {
            size: None,
            mtime: UtcDateTime::UNIX_EPOCH,
            storage_mtime: UtcDateTime::UNIX_EPOCH,
            etag: String::new(),
            mimetype: mimetype::DIRECTORY.to_string(),
            permissions: Permissions::ALL,
            encrypted: false,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mimetype == mimetype::DIRECTORY
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileRow {
    pub(crate) id: i64,
    pub(crate) storage: i64,
    pub(crate) path: String,
    pub(crate) parent: Option<i64>,
    pub(crate) name: String,
    pub(crate) size: Option<i64>,
    pub(crate) mtime: i64,
    pub(crate) storage_mtime: i64,
    pub(crate) etag: String,
    pub(crate) mimetype: String,
    pub(crate) permissions: i64,
    pub(crate) encrypted: bool,
}
impl FileRow {
    /// Row for an upsert; `id` is assigned by the database.
    pub(crate) fn new(
        storage: StorageId,
        path: String,
        parent: Option<i64>,
        name: String,
        attributes: &FileAttributes,
    ) -> Result<Self> {
        Ok(Self {
            id: 0,
            storage: storage.0,
            path,
            parent,
            name,
            size: attributes
                .size
                .map(i64::try_from)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("file size"))?,
            mtime: to_timestamp(attributes.mtime),
            storage_mtime: to_timestamp(attributes.storage_mtime),
            etag: attributes.etag.clone(),
            mimetype: attributes.mimetype.clone(),
            permissions: i64::from(attributes.permissions.bits()),
            encrypted: attributes.encrypted,
        })
    }
}
impl TryFrom<FileRow> for FileRecord {
    type Error = Error;
    fn try_from(row: FileRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            storage: StorageId(row.storage),
            path: PathBuf::from(row.path),
            parent: row.parent,
            name: row.name,
            size: row.size.map(u64::try_from).transpose().or_raise(|| ErrorKind::InvalidData("file size"))?,
            mtime: from_timestamp(row.mtime, "mtime")?,
            storage_mtime: from_timestamp(row.storage_mtime, "storage mtime")?,
            etag: row.etag,
            mimetype: row.mimetype,
            permissions: Permissions::from_bits_truncate(
                u32::try_from(row.permissions).or_raise(|| ErrorKind::InvalidData("permissions"))?,
            ),
            encrypted: row.encrypted,
        })
    }
}
