//! SQLite metadata cache for mounted storages.
//!
//! The cache mirrors what scans have seen on each storage backend. It is not
//! the source of truth, the backends are: if the database is deleted it can
//! be rebuilt by scanning every storage again.
//!
//! # Architecture
//! Three tables, each with its own repository:
//! - **storages** ([`StorageTable`]): storage identifier ↔ numeric id.
//!   Numeric ids are allocated once and never reused.
//! - **files** ([`FileCache`]): one row per cached file or folder, keyed by
//!   `(storage, path)` and linked into a tree through `parent`.
//! - **repair_state** ([`StateTable`]): named one-shot flags.
//!
//! [`CacheTransaction`] runs identity and cache changes atomically.

mod db;
pub mod error;
mod files;
mod models;
mod state;
mod storages;
mod transaction;

pub use crate::db::{Database, PoolSettings};
pub use crate::files::FileCache;
pub use crate::models::{FileAttributes, FileRecord, StorageId, StorageRecord};
pub use crate::state::StateTable;
pub use crate::storages::{MAX_IDENTIFIER_LEN, StorageTable, storage_key};
pub use crate::transaction::CacheTransaction;
