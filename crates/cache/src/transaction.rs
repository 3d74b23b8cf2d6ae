//! A single SQLite transaction over the identity table and the cache.
//!
//! The identity migration performs several dependent steps per user
//! (resolve both identifiers, inspect their data, then rename, repoint or
//! remove). Running them through one [`CacheTransaction`] means a failure
//! part way leaves both tables exactly as they were.

use crate::error::{ErrorKind, Result};
use crate::models::StorageId;
use crate::{files, storages};
use exn::ResultExt;
use sqlx::{Sqlite, Transaction};

/// Rolled back on drop unless [`commit`](Self::commit)ted.
#[derive(Debug)]
pub struct CacheTransaction {
    tx: Transaction<'static, Sqlite>,
}
impl CacheTransaction {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    pub async fn resolve(&mut self, identifier: &str) -> Result<Option<StorageId>> {
        storages::resolve(&mut *self.tx, identifier).await
    }

    pub async fn has_any_data(&mut self, storage: StorageId) -> Result<bool> {
        storages::has_rows(&mut *self.tx, storage).await
    }

    pub async fn rename_storage(&mut self, storage: StorageId, identifier: &str) -> Result<()> {
        storages::rename(&mut *self.tx, storage, identifier).await
    }

    pub async fn repoint_storage(&mut self, from: StorageId, to: StorageId) -> Result<u64> {
        files::repoint(&mut *self.tx, from, to).await
    }

    pub async fn remove_storage(&mut self, identifier: &str) -> Result<StorageId> {
        storages::remove(&mut *self.tx, identifier).await
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.or_raise(|| ErrorKind::Database)
    }
}
