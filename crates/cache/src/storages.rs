//! Storage identity table.
//!
//! Maps storage identifiers (`kind::location`) to the numeric ids every
//! cached file row is keyed by. The mapping is a bijection and numeric ids
//! are never reused once freed.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{StorageId, StorageRecord, StorageRow, to_timestamp};
use exn::{OptionExt, ResultExt};
use sqlx::{SqliteConnection, SqlitePool};
use std::borrow::Cow;
use time::UtcDateTime;
use tracing::instrument;

/// Identifiers longer than this are stored as a digest.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// The form an identifier is stored and looked up in.
///
/// Identifiers up to [`MAX_IDENTIFIER_LEN`] bytes are stored verbatim.
/// Longer ones (remote locations can be arbitrarily long) are replaced by
/// the first 32 hex characters of their BLAKE3 digest.
pub fn storage_key(identifier: &str) -> Cow<'_, str> {
    match identifier.len() > MAX_IDENTIFIER_LEN {
        true => Cow::Owned(blake3::hash(identifier.as_bytes()).to_hex()[..32].to_string()),
        false => Cow::Borrowed(identifier),
    }
}

/// Escape `%`, `_` and the escape character itself for a `LIKE .. ESCAPE '\'`.
pub(crate) fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// =========================================================================
// Connection-level operations, shared with `CacheTransaction`
// =========================================================================

pub(crate) async fn resolve(conn: &mut SqliteConnection, identifier: &str) -> Result<Option<StorageId>> {
    let id: Option<i64> = sqlx::query_scalar("SELECT numeric_id FROM storages WHERE identifier = ?")
        .bind(storage_key(identifier).as_ref())
        .fetch_optional(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(id.map(StorageId))
}

pub(crate) async fn get(conn: &mut SqliteConnection, id: StorageId) -> Result<Option<StorageRecord>> {
    let row: Option<StorageRow> =
        sqlx::query_as("SELECT numeric_id, identifier, available, last_checked FROM storages WHERE numeric_id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
    row.map(StorageRecord::try_from).transpose()
}

pub(crate) async fn has_rows(conn: &mut SqliteConnection, id: StorageId) -> Result<bool> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM files WHERE storage = ?)")
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)
}

pub(crate) async fn remove(conn: &mut SqliteConnection, identifier: &str) -> Result<StorageId> {
    let id = resolve(conn, identifier).await?.ok_or_raise(|| ErrorKind::StorageNotFound(identifier.to_string()))?;
    if has_rows(conn, id).await? {
        exn::bail!(ErrorKind::StorageInUse(identifier.to_string()));
    }
    sqlx::query("DELETE FROM storages WHERE numeric_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(id)
}

pub(crate) async fn rename(conn: &mut SqliteConnection, id: StorageId, identifier: &str) -> Result<()> {
    if let Some(existing) = resolve(conn, identifier).await? {
        if existing == id {
            return Ok(());
        }
        exn::bail!(ErrorKind::StorageExists(identifier.to_string()));
    }
    let result = sqlx::query("UPDATE storages SET identifier = ? WHERE numeric_id = ?")
        .bind(storage_key(identifier).as_ref())
        .bind(id)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    if result.rows_affected() == 0 {
        exn::bail!(ErrorKind::StorageNotFound(id.to_string()));
    }
    Ok(())
}

/// Repository for the storage identity table.
#[derive(Debug, Clone)]
pub struct StorageTable {
    pool: SqlitePool,
}
impl From<&Database> for StorageTable {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl StorageTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.pool.acquire().await.or_raise(|| ErrorKind::Database)
    }

    /// Look up the numeric id of an identifier, without side effects.
    pub async fn resolve(&self, identifier: &str) -> Result<Option<StorageId>> {
        resolve(&mut *self.conn().await?, identifier).await
    }

    /// Return the numeric id of an identifier, allocating one if needed.
    ///
    /// Safe under concurrent first use: the insert is a no-op for every
    /// caller but the first, and all of them read back the same id.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_or_create(&self, identifier: &str) -> Result<StorageId> {
        let mut conn = self.conn().await?;
        let result = sqlx::query(include_str!("../queries/get_or_create_storage.sql"))
            .bind(storage_key(identifier).as_ref())
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() > 0 {
            tracing::debug!(identifier, "Allocated numeric id for new storage");
        }
        resolve(&mut conn, identifier).await?.ok_or_raise(|| ErrorKind::StorageNotFound(identifier.to_string()))
    }

    /// Delete an identifier. Fails if any cached file still references it.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove(&self, identifier: &str) -> Result<StorageId> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let id = remove(&mut *tx, identifier).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(id)
    }

    /// Point an existing numeric id at a new identifier.
    ///
    /// Only the identity migration should need this.
    #[instrument(level = "debug", skip(self))]
    pub async fn rename(&self, id: StorageId, identifier: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        rename(&mut *tx, id, identifier).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Reverse lookup.
    pub async fn get(&self, id: StorageId) -> Result<Option<StorageRecord>> {
        get(&mut *self.conn().await?, id).await
    }

    pub async fn list(&self) -> Result<Vec<StorageRecord>> {
        let rows: Vec<StorageRow> =
            sqlx::query_as("SELECT numeric_id, identifier, available, last_checked FROM storages ORDER BY numeric_id")
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(StorageRecord::try_from).collect()
    }

    /// All storages whose stored identifier starts with `prefix`.
    pub async fn list_with_prefix(&self, prefix: &str) -> Result<Vec<StorageRecord>> {
        let rows: Vec<StorageRow> = sqlx::query_as(
            "SELECT numeric_id, identifier, available, last_checked FROM storages \
             WHERE identifier LIKE ? ESCAPE '\\' ORDER BY numeric_id",
        )
        .bind(format!("{}%", escape_like(prefix)))
        .fetch_all(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(StorageRecord::try_from).collect()
    }

    /// Record whether the backend behind a storage could be reached.
    pub async fn set_availability(&self, id: StorageId, available: bool) -> Result<()> {
        sqlx::query("UPDATE storages SET available = ?, last_checked = ? WHERE numeric_id = ?")
            .bind(available)
            .bind(to_timestamp(UtcDateTime::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileAttributes, FileCache};
    use rstest::rstest;
    use std::collections::HashSet;
    use std::path::Path;

    async fn table() -> (Database, StorageTable) {
        let db = Database::connect_in_memory().await.unwrap();
        let table = StorageTable::from(&db);
        (db, table)
    }

    #[rstest]
    #[case("home::alice", "home::alice")]
    #[case("local::/srv/data/alice/", "local::/srv/data/alice/")]
    fn test_short_identifiers_are_verbatim(#[case] identifier: &str, #[case] expected: &str) {
        assert_eq!(storage_key(identifier), expected);
    }

    #[test]
    fn test_long_identifiers_are_hashed() {
        let long = format!("amazon::{}", "x".repeat(80));
        let key = storage_key(&long);
        assert_eq!(key.len(), 32);
        assert_eq!(key, storage_key(&long));
        assert_ne!(key, storage_key(&format!("{long}y")));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("local::/srv/da_ta%/"), "local::/srv/da\\_ta\\%/");
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let (_db, table) = table().await;
        assert_eq!(table.resolve("home::alice").await.unwrap(), None);
        let id = table.get_or_create("home::alice").await.unwrap();
        assert_eq!(table.get_or_create("home::alice").await.unwrap(), id);
        assert_eq!(table.resolve("home::alice").await.unwrap(), Some(id));
        let other = table.get_or_create("home::bob").await.unwrap();
        assert_ne!(id, other);
    }

    #[tokio::test]
    async fn test_get_or_create_concurrent_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(dir.path().join("cache.db")).await.unwrap();
        let table = StorageTable::from(&db);
        let attempts = (0..16).map(|_| {
            let table = table.clone();
            tokio::spawn(async move { table.get_or_create("home::racer").await.unwrap() })
        });
        let ids: HashSet<StorageId> =
            futures::future::join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(table.list().await.unwrap().len(), 1);
        db.close().await;
    }

    #[tokio::test]
    async fn test_distinct_identifiers_never_share_ids() {
        let (_db, table) = table().await;
        let mut seen = HashSet::new();
        for i in 0..20 {
            assert!(seen.insert(table.get_or_create(&format!("home::user{i}")).await.unwrap()));
        }
    }

    #[tokio::test]
    async fn test_numeric_ids_are_never_reused() {
        let (_db, table) = table().await;
        let first = table.get_or_create("home::alice").await.unwrap();
        table.remove("home::alice").await.unwrap();
        let second = table.get_or_create("home::alice").await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_remove_refuses_storage_with_rows() {
        let (db, table) = table().await;
        let id = table.get_or_create("home::alice").await.unwrap();
        FileCache::from(&db).put(id, Path::new(""), &FileAttributes::incomplete_folder()).await.unwrap();
        let err = table.remove("home::alice").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::StorageInUse(_)));
        assert_eq!(table.resolve("home::alice").await.unwrap(), Some(id));

        let err = table.remove("home::nobody").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::StorageNotFound(_)));
    }

    #[tokio::test]
    async fn test_rename() {
        let (_db, table) = table().await;
        let legacy = table.get_or_create("local::/srv/data/alice/").await.unwrap();
        table.rename(legacy, "home::alice").await.unwrap();
        assert_eq!(table.resolve("home::alice").await.unwrap(), Some(legacy));
        assert_eq!(table.resolve("local::/srv/data/alice/").await.unwrap(), None);

        let bob = table.get_or_create("home::bob").await.unwrap();
        let err = table.rename(bob, "home::alice").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::StorageExists(_)));

        let err = table.rename(StorageId(999), "home::carol").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::StorageNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_list_and_prefix() {
        let (_db, table) = table().await;
        let a = table.get_or_create("local::/srv/data/alice/").await.unwrap();
        table.get_or_create("home::bob").await.unwrap();
        table.get_or_create("local::/srv/data_x/carol/").await.unwrap();
        assert_eq!(table.get(a).await.unwrap().unwrap().identifier, "local::/srv/data/alice/");
        assert_eq!(table.list().await.unwrap().len(), 3);
        // `_` in the prefix is literal, not a wildcard.
        let local = table.list_with_prefix("local::/srv/data_").await.unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(table.list_with_prefix("local::").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_set_availability() {
        let (_db, table) = table().await;
        let id = table.get_or_create("home::alice").await.unwrap();
        let record = table.get(id).await.unwrap().unwrap();
        assert!(record.available);
        assert_eq!(record.last_checked, None);
        table.set_availability(id, false).await.unwrap();
        let record = table.get(id).await.unwrap().unwrap();
        assert!(!record.available);
        assert!(record.last_checked.is_some());
    }
}
