//! Connection pool and schema setup.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{ErrorKind, Result};
use crate::transaction::CacheTransaction;

static SCHEMA: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Pool tuning for file-backed databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Scans of different storages run side by side, each mostly waiting on
    /// its backend, so a handful of connections goes a long way.
    pub max_connections: u32,
    /// How long a writer waits on `SQLITE_BUSY` before giving up. WAL mode
    /// allows only one writer, and a folder upsert queues behind whatever
    /// another scan is committing.
    pub busy_timeout: Duration,
}
impl Default for PoolSettings {
    fn default() -> Self {
        Self { max_connections: 5, busy_timeout: Duration::from_millis(1500) }
    }
}

/// The cache database.
///
/// Cheap to clone; clones share one pool. The repositories
/// ([`StorageTable`](crate::StorageTable), [`FileCache`](crate::FileCache),
/// [`StateTable`](crate::StateTable)) are built from it with `From<&Database>`.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file at `path` with default
    /// pool settings, and bring its schema up to date.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with(path, PoolSettings::default()).await
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect_with(path: impl AsRef<Path>, settings: PoolSettings) -> Result<Self> {
        let options = connect_options(settings.busy_timeout).filename(path.as_ref()).create_if_missing(true);
        Self::open(options, settings.max_connections.max(1)).await
    }

    /// A private in-memory database, for tests here and in dependent crates.
    ///
    /// Every connection to `:memory:` gets a database of its own, so the
    /// pool is pinned to a single connection. Don't hold a
    /// [`CacheTransaction`] while using the repositories on the same
    /// database: they would wait for the one connection forever.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = connect_options(PoolSettings::default().busy_timeout).filename(":memory:");
        Self::open(options, 1).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Runs for every pooled connection, not only the first.
            .after_connect(|conn, meta| Box::pin(async move { tune_connection(conn, meta).await }))
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        SCHEMA.run(&pool).await.or_raise(|| ErrorKind::Migration)?;
        debug!(max_connections, "Cache database ready");
        Ok(Self { pool })
    }

    /// Start a transaction spanning the identity table and the cache.
    pub async fn begin(&self) -> Result<CacheTransaction> {
        let tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Ok(CacheTransaction::new(tx))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Refresh planner statistics and close every connection. Clones of
    /// this database are closed too.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

fn connect_options(busy_timeout: Duration) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        // Checks `files.parent` and `files.storage` references.
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(busy_timeout)
        // Removed subtrees are usually rescanned soon; keep the pages.
        .auto_vacuum(SqliteAutoVacuum::None)
}

/// Per-connection settings `SqliteConnectOptions` has no setter for.
async fn tune_connection(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
    sqlx::query(
        r#"
            PRAGMA temp_store = MEMORY;
            PRAGMA cache_size = -16384;
            PRAGMA wal_autocheckpoint = 1000;
        "#,
    )
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pragma_int(db: &Database, pragma: &str) -> i64 {
        let row: (i64,) = sqlx::query_as(&format!("PRAGMA {pragma}")).fetch_one(db.pool()).await.unwrap();
        row.0
    }

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::connect_in_memory().await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('storages', 'files')")
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert_eq!(tables.len(), 2);
        // A second run finds nothing to apply.
        SCHEMA.run(db.pool()).await.unwrap();
        db.close().await;
        assert!(db.pool().is_closed());
    }

    #[tokio::test]
    async fn test_connection_tuning() {
        let db = Database::connect_in_memory().await.unwrap();
        assert_eq!(pragma_int(&db, "foreign_keys").await, 1);
        assert_eq!(pragma_int(&db, "wal_autocheckpoint").await, 1000);
        assert_eq!(pragma_int(&db, "cache_size").await, -16384);
    }

    #[tokio::test]
    async fn test_file_database_uses_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let settings = PoolSettings { max_connections: 2, busy_timeout: Duration::from_millis(250) };
        let db = Database::connect_with(&path, settings).await.unwrap();
        assert_eq!(pragma_int(&db, "busy_timeout").await, 250);
        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode").fetch_one(db.pool()).await.unwrap();
        assert_eq!(mode.0, "wal");
        db.close().await;
        assert!(path.exists());

        // Reopening an existing file keeps its schema.
        let db = Database::connect(&path).await.unwrap();
        db.close().await;
    }
}
