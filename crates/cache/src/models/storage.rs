use crate::error::{Error, Result};
use crate::models::from_timestamp;
use derive_more::Display;
use time::UtcDateTime;

/// Numeric id of a storage, the foreign key of every cached file row.
///
/// Allocated once per identifier and never reused, even after the storage
/// is removed.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::Type)]
#[display("{_0}")]
#[sqlx(transparent)]
pub struct StorageId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRecord {
    pub numeric_id: StorageId,
    /// Stored identifier. Identifiers longer than 64 bytes are stored as
    /// their digest, see [`storage_key`](crate::storage_key).
    pub identifier: String,
    /// Whether the last scan could reach the backend.
    pub available: bool,
    pub last_checked: Option<UtcDateTime>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct StorageRow {
    numeric_id: i64,
    identifier: String,
    available: bool,
    last_checked: Option<i64>,
}
impl TryFrom<StorageRow> for StorageRecord {
    type Error = Error;
    fn try_from(row: StorageRow) -> Result<Self> {
        Ok(Self {
            numeric_id: StorageId(row.numeric_id),
            identifier: row.identifier,
            available: row.available,
            last_checked: row.last_checked.map(|t| from_timestamp(t, "last checked")).transpose()?,
        })
    }
}
