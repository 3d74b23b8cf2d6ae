//! Path locking.
//!
//! The scanner takes a shared lock on every folder while it reconciles that
//! folder's children, and on every file while it updates the file's record.
//! Writers (uploads, moves) take exclusive locks. Locks are scoped to a
//! storage (by identifier) and a single path, so unrelated subtrees never
//! contend.
//!
//! Acquisition never waits: a conflicting lock surfaces as
//! [`ErrorKind::Locked`] and the caller decides whether to retry. Timeouts
//! and retry policy belong to the caller.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use derive_more::Display;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

pub type LockHandle = Arc<dyn LockProvider>;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum LockKind {
    #[display("shared")]
    Shared,
    #[display("exclusive")]
    Exclusive,
}

/// A held lock. Released when dropped, on every exit path.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    path: PathBuf,
    kind: LockKind,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}
impl LockGuard {
    pub fn new(path: PathBuf, kind: LockKind, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { path, kind, release: Some(Box::new(release)) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }
}
impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).field("kind", &self.kind).finish()
    }
}

/// Lock provider contract consumed by the scanner.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Acquire a lock on `path` within `scope` (a storage identifier).
    ///
    /// Returns [`Locked`](ErrorKind::Locked) if a conflicting lock is held.
    async fn acquire(&self, scope: &str, path: &Path, kind: LockKind) -> Result<LockGuard>;

    async fn acquire_shared(&self, scope: &str, path: &Path) -> Result<LockGuard> {
        self.acquire(scope, path, LockKind::Shared).await
    }

    async fn acquire_exclusive(&self, scope: &str, path: &Path) -> Result<LockGuard> {
        self.acquire(scope, path, LockKind::Exclusive).await
    }
}

#[derive(Debug, Clone, Copy)]
enum Held {
    Shared(usize),
    Exclusive,
}

type LockTable = HashMap<(String, PathBuf), Held>;

/// In-process lock provider.
///
/// Good enough for a single process (CLI runs, tests). Any number of shared
/// locks may be held on a path at once; an exclusive lock excludes
/// everything else on that exact path.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockProvider {
    locks: Arc<Mutex<LockTable>>,
}
impl MemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of paths currently holding at least one lock.
    pub fn held(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(locks: &Mutex<LockTable>, key: &(String, PathBuf)) {
        let mut table = locks.lock().unwrap_or_else(PoisonError::into_inner);
        match table.get(key).copied() {
            Some(Held::Shared(n)) if n > 1 => {
                table.insert(key.clone(), Held::Shared(n - 1));
            },
            Some(_) => {
                table.remove(key);
            },
            None => tracing::warn!(path = %key.1.display(), "Released a lock that was not held"),
        }
    }
}

#[async_trait]
impl LockProvider for MemoryLockProvider {
    async fn acquire(&self, scope: &str, path: &Path, kind: LockKind) -> Result<LockGuard> {
        let key = (scope.to_string(), path.to_path_buf());
        {
            let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            let next = match (table.get(&key).copied(), kind) {
                (None, LockKind::Shared) => Held::Shared(1),
                (None, LockKind::Exclusive) => Held::Exclusive,
                (Some(Held::Shared(n)), LockKind::Shared) => Held::Shared(n + 1),
                (Some(_), _) => exn::bail!(ErrorKind::Locked(path.to_path_buf())),
            };
            table.insert(key.clone(), next);
        }
        let locks = Arc::clone(&self.locks);
        Ok(LockGuard::new(path.to_path_buf(), kind, move || Self::release(&locks, &key)))
    }
}
