pub mod backend;
mod entry;
pub mod error;
pub mod lock;
pub mod mimetype;
mod path;
mod permissions;

pub use crate::backend::StorageBackend;
pub use crate::entry::{Entry, EntryKind};
pub use crate::lock::{LockGuard, LockHandle, LockKind, LockProvider, MemoryLockProvider};
pub use crate::path::{is_valid_name, normalize as normalize_path, to_storage_string, validate as validate_path};
pub use crate::permissions::Permissions;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
