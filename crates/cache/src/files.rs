//! Metadata cache.
//!
//! One row per file or folder, keyed by `(storage, path)`. Rows form a tree
//! per storage: the root has the empty path and no parent, every other row
//! points at its containing folder's row.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{FileAttributes, FileRecord, FileRow, StorageId};
use crate::storages::{escape_like, has_rows};
use exn::{OptionExt, ResultExt};
use filecache_storage::{mimetype, normalize_path, to_storage_string};
use sqlx::{SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Normalized, `/`-separated form of a path as stored in the `path` column.
fn path_key(path: &Path) -> Result<String> {
    let normalized = normalize_path(path).or_raise(|| ErrorKind::InvalidPath(path.to_path_buf()))?;
    to_storage_string(&normalized).ok_or_raise(|| ErrorKind::InvalidPath(path.to_path_buf()))
}

/// Split a stored path into its parent's stored path and its own name.
/// `None` for the root.
fn split_key(key: &str) -> Option<(&str, &str)> {
    match key.is_empty() {
        true => None,
        false => Some(key.rsplit_once('/').unwrap_or(("", key))),
    }
}

// =========================================================================
// Connection-level operations, shared with `CacheTransaction`
// =========================================================================

async fn get(conn: &mut SqliteConnection, storage: StorageId, key: &str) -> Result<Option<FileRecord>> {
    let row: Option<FileRow> = sqlx::query_as(include_str!("../queries/get_file.sql"))
        .bind(storage)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    row.map(FileRecord::try_from).transpose()
}

async fn upsert(conn: &mut SqliteConnection, row: FileRow) -> Result<()> {
    sqlx::query(include_str!("../queries/upsert_file.sql"))
        .bind(row.storage)
        .bind(row.path)
        .bind(row.parent)
        .bind(row.name)
        .bind(row.size)
        .bind(row.mtime)
        .bind(row.storage_mtime)
        .bind(row.etag)
        .bind(row.mimetype)
        .bind(row.permissions)
        .bind(row.encrypted)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

async fn put(
    conn: &mut SqliteConnection,
    storage: StorageId,
    path: &Path,
    attributes: &FileAttributes,
) -> Result<FileRecord> {
    let key = path_key(path)?;
    let (parent, name) = match split_key(&key) {
        None => (None, String::new()),
        Some((parent_key, name)) => {
            let parent = match get(conn, storage, parent_key).await? {
                Some(parent) => parent,
                // The root is the only folder that is ever created implicitly.
                None if parent_key.is_empty() => {
                    let row = FileRow::new(storage, String::new(), None, String::new(), &FileAttributes::incomplete_folder())?;
                    upsert(conn, row).await?;
                    get(conn, storage, "").await?.ok_or_raise(|| ErrorKind::ParentNotFound(PathBuf::new()))?
                },
                None => exn::bail!(ErrorKind::ParentNotFound(PathBuf::from(parent_key))),
            };
            if !parent.is_dir() {
                exn::bail!(ErrorKind::NotAFolder(parent.path));
            }
            (Some(parent.id), name.to_string())
        },
    };
    upsert(conn, FileRow::new(storage, key.clone(), parent, name, attributes)?).await?;
    get(conn, storage, &key).await?.ok_or_raise(|| ErrorKind::Database)
}

async fn children(conn: &mut SqliteConnection, id: i64) -> Result<Vec<FileRecord>> {
    let rows: Vec<FileRow> = sqlx::query_as(include_str!("../queries/list_children.sql"))
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    rows.into_iter().map(FileRecord::try_from).collect()
}

async fn remove(conn: &mut SqliteConnection, storage: StorageId, path: &Path, recursive: bool) -> Result<u64> {
    let key = path_key(path)?;
    let Some(record) = get(conn, storage, &key).await? else {
        return Ok(0);
    };
    if !recursive {
        let has_children: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM files WHERE parent = ?)")
            .bind(record.id)
            .fetch_one(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if has_children {
            exn::bail!(ErrorKind::NotEmpty(record.path));
        }
    }
    let result = sqlx::query(include_str!("../queries/remove_subtree.sql"))
        .bind(storage)
        .bind(&key)
        .bind(format!("{}/%", escape_like(&key)))
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(result.rows_affected())
}

pub(crate) async fn repoint(conn: &mut SqliteConnection, from: StorageId, to: StorageId) -> Result<u64> {
    if has_rows(conn, to).await? {
        exn::bail!(ErrorKind::TargetNotEmpty(to.0));
    }
    let result = sqlx::query("UPDATE files SET storage = ? WHERE storage = ?")
        .bind(to)
        .bind(from)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(result.rows_affected())
}

/// Repository for cached file metadata.
#[derive(Debug, Clone)]
pub struct FileCache {
    pool: SqlitePool,
}
impl From<&Database> for FileCache {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl FileCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.pool.acquire().await.or_raise(|| ErrorKind::Database)
    }

    pub async fn get(&self, storage: StorageId, path: impl AsRef<Path>) -> Result<Option<FileRecord>> {
        let key = path_key(path.as_ref())?;
        get(&mut *self.conn().await?, storage, &key).await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        let row: Option<FileRow> = sqlx::query_as(include_str!("../queries/get_file_by_id.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(FileRecord::try_from).transpose()
    }

    /// Insert or update the record at `path`.
    ///
    /// The parent folder must already be cached, except for the root which
    /// is created (as an incomplete folder) when missing. Returns the record
    /// as stored; timestamps are truncated to whole seconds.
    #[instrument(level = "trace", skip(self, attributes))]
    pub async fn put(
        &self,
        storage: StorageId,
        path: impl AsRef<Path> + std::fmt::Debug,
        attributes: &FileAttributes,
    ) -> Result<FileRecord> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let record = put(&mut *tx, storage, path.as_ref(), attributes).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(record)
    }

    /// Delete the record at `path`. With `recursive`, every descendant goes
    /// too; without it, a folder that still has children is refused with
    /// [`NotEmpty`](ErrorKind::NotEmpty).
    ///
    /// Returns the number of rows deleted (zero if nothing was cached).
    #[instrument(level = "debug", skip(self))]
    pub async fn remove(&self, storage: StorageId, path: impl AsRef<Path> + std::fmt::Debug, recursive: bool) -> Result<u64> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let removed = remove(&mut *tx, storage, path.as_ref(), recursive).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(removed)
    }

    /// Direct children of the folder at `path`, ordered by name. Empty if
    /// the folder isn't cached.
    pub async fn children(&self, storage: StorageId, path: impl AsRef<Path>) -> Result<Vec<FileRecord>> {
        let key = path_key(path.as_ref())?;
        let mut conn = self.conn().await?;
        match get(&mut conn, storage, &key).await? {
            Some(folder) => children(&mut conn, folder.id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Whether at least one record exists for the storage.
    ///
    /// A storage that was never scanned and one that is genuinely empty
    /// both have no records, so both answer `false`.
    pub async fn has_any_data(&self, storage: StorageId) -> Result<bool> {
        has_rows(&mut *self.conn().await?, storage).await
    }

    pub async fn count(&self, storage: StorageId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE storage = ?")
            .bind(storage)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("row count"))
    }

    /// Move every record of `from` onto `to`, which must have none.
    #[instrument(level = "debug", skip(self))]
    pub async fn repoint_storage(&self, from: StorageId, to: StorageId) -> Result<u64> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let moved = repoint(&mut *tx, from, to).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(moved)
    }

    /// Path of an incomplete folder (unknown size), deepest first.
    pub async fn incomplete(&self, storage: StorageId) -> Result<Option<PathBuf>> {
        let path: Option<String> = sqlx::query_scalar(include_str!("../queries/next_incomplete.sql"))
            .bind(storage)
            .bind(mimetype::DIRECTORY)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(path.map(PathBuf::from))
    }

    /// Overwrite just the size of a record. Returns `false` if nothing is
    /// cached at `path`.
    pub async fn set_size(&self, storage: StorageId, path: impl AsRef<Path>, size: Option<u64>) -> Result<bool> {
        let key = path_key(path.as_ref())?;
        let size = size.map(i64::try_from).transpose().or_raise(|| ErrorKind::InvalidData("file size"))?;
        let result = sqlx::query("UPDATE files SET size = ? WHERE storage = ? AND path = ?")
            .bind(size)
            .bind(storage)
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageTable;
    use filecache_storage::Permissions;
    use rstest::rstest;
    use time::UtcDateTime;

    fn file(size: u64) -> FileAttributes {
        let mtime = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        FileAttributes {
            size: Some(size),
            mtime,
            storage_mtime: mtime,
            etag: format!("etag-{size}"),
            mimetype: "text/plain".to_string(),
            permissions: Permissions::ALL.difference(Permissions::CREATE),
            encrypted: false,
        }
    }

    fn folder(size: Option<u64>) -> FileAttributes {
        FileAttributes { size, ..FileAttributes::incomplete_folder() }
    }

    async fn cache() -> (Database, FileCache, StorageId) {
        let db = Database::connect_in_memory().await.unwrap();
        let storage = StorageTable::from(&db).get_or_create("home::alice").await.unwrap();
        let cache = FileCache::from(&db);
        (db, cache, storage)
    }

    #[rstest]
    #[case("", None)]
    #[case("a.txt", Some(("", "a.txt")))]
    #[case("docs/inner/a.txt", Some(("docs/inner", "a.txt")))]
    fn test_split_key(#[case] key: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(split_key(key), expected);
    }

    #[tokio::test]
    async fn test_put_creates_root_implicitly() {
        let (_db, cache, storage) = cache().await;
        let record = cache.put(storage, "a.txt", &file(5)).await.unwrap();
        let root = cache.get(storage, "").await.unwrap().unwrap();
        assert!(root.is_incomplete());
        assert_eq!(root.parent, None);
        assert_eq!(record.parent, Some(root.id));
        assert_eq!(record.name, "a.txt");
        assert_eq!(record.size, Some(5));
    }

    #[tokio::test]
    async fn test_put_requires_parent() {
        let (_db, cache, storage) = cache().await;
        let err = cache.put(storage, "docs/a.txt", &file(5)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ParentNotFound(_)));
        assert_eq!(cache.count(storage).await.unwrap(), 0);

        cache.put(storage, "a.txt", &file(5)).await.unwrap();
        let err = cache.put(storage, "a.txt/b.txt", &file(5)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotAFolder(_)));
    }

    #[tokio::test]
    async fn test_put_updates_in_place() {
        let (_db, cache, storage) = cache().await;
        let first = cache.put(storage, "a.txt", &file(5)).await.unwrap();
        let second = cache.put(storage, "./a.txt", &file(9)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.size, Some(9));
        assert_eq!(cache.get_by_id(first.id).await.unwrap().unwrap(), second);
        assert_eq!(cache.count(storage).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_remove_non_recursive_refuses_folders_with_children() {
        let (_db, cache, storage) = cache().await;
        cache.put(storage, "docs", &folder(None)).await.unwrap();
        cache.put(storage, "docs/a.txt", &file(1)).await.unwrap();
        let err = cache.remove(storage, "docs", false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotEmpty(_)));
        assert_eq!(cache.remove(storage, "docs/a.txt", false).await.unwrap(), 1);
        assert_eq!(cache.remove(storage, "docs", false).await.unwrap(), 1);
        assert_eq!(cache.remove(storage, "missing", false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_recursive() {
        let (_db, cache, storage) = cache().await;
        cache.put(storage, "docs", &folder(None)).await.unwrap();
        cache.put(storage, "docs/inner", &folder(None)).await.unwrap();
        cache.put(storage, "docs/inner/a.txt", &file(1)).await.unwrap();
        // A sibling sharing the prefix must survive.
        cache.put(storage, "docs_old", &folder(None)).await.unwrap();
        assert_eq!(cache.remove(storage, "docs", true).await.unwrap(), 3);
        assert!(cache.get(storage, "docs_old").await.unwrap().is_some());
        assert_eq!(cache.count(storage).await.unwrap(), 2);
        assert_eq!(cache.remove(storage, "", true).await.unwrap(), 2);
        assert!(!cache.has_any_data(storage).await.unwrap());
    }

    #[tokio::test]
    async fn test_children() {
        let (_db, cache, storage) = cache().await;
        cache.put(storage, "b.txt", &file(1)).await.unwrap();
        cache.put(storage, "a", &folder(Some(0))).await.unwrap();
        cache.put(storage, "a/c.txt", &file(1)).await.unwrap();
        let names: Vec<_> = cache.children(storage, "").await.unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b.txt"]);
        assert!(cache.children(storage, "missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_has_any_data_and_repoint() {
        let db = Database::connect_in_memory().await.unwrap();
        let table = StorageTable::from(&db);
        let cache = FileCache::from(&db);
        let legacy = table.get_or_create("local::/srv/data/alice/").await.unwrap();
        let home = table.get_or_create("home::alice").await.unwrap();
        cache.put(legacy, "a.txt", &file(1)).await.unwrap();
        assert!(cache.has_any_data(legacy).await.unwrap());
        assert!(!cache.has_any_data(home).await.unwrap());

        assert_eq!(cache.repoint_storage(legacy, home).await.unwrap(), 2);
        assert!(!cache.has_any_data(legacy).await.unwrap());
        assert_eq!(cache.get(home, "a.txt").await.unwrap().unwrap().size, Some(1));

        cache.put(legacy, "b.txt", &file(1)).await.unwrap();
        let err = cache.repoint_storage(legacy, home).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TargetNotEmpty(_)));
        assert_eq!(cache.count(legacy).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_incomplete_is_deepest_first() {
        let (_db, cache, storage) = cache().await;
        cache.put(storage, "a", &folder(None)).await.unwrap();
        cache.put(storage, "a/b", &folder(None)).await.unwrap();
        cache.put(storage, "c", &folder(Some(0))).await.unwrap();
        assert_eq!(cache.incomplete(storage).await.unwrap(), Some(PathBuf::from("a/b")));
        assert!(cache.set_size(storage, "a/b", Some(0)).await.unwrap());
        assert_eq!(cache.incomplete(storage).await.unwrap(), Some(PathBuf::from("a")));
        cache.set_size(storage, "a", Some(0)).await.unwrap();
        cache.set_size(storage, "", Some(0)).await.unwrap();
        assert_eq!(cache.incomplete(storage).await.unwrap(), None);
        assert!(!cache.set_size(storage, "missing", Some(0)).await.unwrap());
    }
}
