mod file;
mod storage;

pub use self::file::{FileAttributes, FileRecord};
pub(crate) use self::file::FileRow;
pub use self::storage::{StorageId, StorageRecord};
pub(crate) use self::storage::StorageRow;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::UtcDateTime;

/// Timestamps are stored as Unix seconds.
pub(crate) fn to_timestamp(time: UtcDateTime) -> i64 {
    time.unix_timestamp()
}

pub(crate) fn from_timestamp(seconds: i64, what: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(seconds).or_raise(|| ErrorKind::InvalidData(what))
}
