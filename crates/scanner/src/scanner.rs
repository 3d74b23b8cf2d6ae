//! Storage scanner.
//!
//! A scan walks a storage's tree from a target path and brings the cache in
//! line with what the backend lists. Per folder:
//!
//! 1. Take a shared lock on the folder (unless locking is disabled).
//! 2. List it. A failed listing writes nothing for the folder.
//! 3. Reconcile every listed child against its cached record, honoring the
//!    [`ReuseFlags`], and descend into child folders as the [`ScanMode`]
//!    asks.
//! 4. Remove cached children the backend no longer lists.
//! 5. Store the folder itself with sizes and mtimes aggregated from its
//!    children.
//!
//! Excluded paths (partial uploads, blacklisted names) are never touched.
//! A child subtree that is locked or unreachable is recorded as a failure
//! and left incomplete; its siblings carry on.

use crate::error::{Error, ErrorKind, Result};
use crate::filter::ScanFilter;
use crate::outcome::{ScanFailure, ScanOutcome, ScanStats};
use crate::reuse::{ReuseFlags, ScanMode};
use exn::ResultExt;
use filecache_cache::{Database, FileAttributes, FileCache, FileRecord, StorageId, StorageTable};
use filecache_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};
use filecache_storage::{BackendHandle, Entry, LockGuard, LockHandle, MemoryLockProvider, mimetype, normalize_path};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::UtcDateTime;
use tracing::instrument;

/// Scans one storage backend into the cache.
pub struct Scanner {
    backend: BackendHandle,
    storages: StorageTable,
    files: FileCache,
    locks: Option<LockHandle>,
    filter: ScanFilter,
}

/// State carried through one scan invocation.
struct Walk {
    storage: StorageId,
    mode: ScanMode,
    reuse: ReuseFlags,
    started: UtcDateTime,
    stats: ScanStats,
    failures: Vec<ScanFailure>,
}
impl Walk {
    fn new(storage: StorageId, mode: ScanMode, reuse: ReuseFlags) -> Self {
        Self {
            storage,
            mode,
            reuse,
            started: UtcDateTime::now(),
            stats: ScanStats::default(),
            failures: Vec::new(),
        }
    }

    fn tally(&mut self, before: Option<&FileRecord>, after: &FileRecord) -> bool {
        match before {
            None => {
                self.stats.added += 1;
                true
            },
            Some(before) if before.attributes() != after.attributes() => {
                self.stats.updated += 1;
                true
            },
            Some(_) => false,
        }
    }
}

impl Scanner {
    /// A scanner with its own in-process lock provider and the default
    /// filter. Scanners that must see each other's locks should share a
    /// provider through [`with_lock_provider`](Self::with_lock_provider).
    pub fn new(backend: BackendHandle, db: &Database) -> Self {
        Self {
            backend,
            storages: StorageTable::from(db),
            files: FileCache::from(db),
            locks: Some(Arc::new(MemoryLockProvider::new())),
            filter: ScanFilter::default(),
        }
    }

    pub fn with_lock_provider(mut self, locks: LockHandle) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn without_locking(mut self) -> Self {
        self.locks = None;
        self
    }

    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    pub fn identifier(&self) -> &str {
        self.backend.identifier()
    }

    /// Numeric id of the scanned storage, allocated on first use.
    pub async fn storage_id(&self) -> Result<StorageId> {
        self.storages.get_or_create(self.backend.identifier()).await.or_raise(|| ErrorKind::Cache)
    }

    /// Whether anything of this storage has been cached yet.
    pub async fn has_data(&self) -> Result<bool> {
        let storage = self.storage_id().await?;
        self.files.has_any_data(storage).await.or_raise(|| ErrorKind::Cache)
    }

    /// The deepest folder still waiting for a complete scan.
    pub async fn incomplete(&self) -> Result<Option<PathBuf>> {
        let storage = self.storage_id().await?;
        self.files.incomplete(storage).await.or_raise(|| ErrorKind::Cache)
    }

    /// Scan `path` and everything below it that `mode` reaches.
    ///
    /// Returns `Err` when the target itself can't be scanned: the backend is
    /// unreachable, the target is locked, or the cache failed. Failures
    /// further down are collected in [`ScanOutcome::failures`].
    #[instrument(level = "info", skip(self, path), fields(storage = self.backend.identifier(), path = %path.as_ref().display()))]
    pub async fn scan(&self, path: impl AsRef<Path>, mode: ScanMode, reuse: ReuseFlags) -> Result<ScanOutcome> {
        let path = normalize_path(path.as_ref()).or_raise(|| ErrorKind::InvalidPath(path.as_ref().to_path_buf()))?;
        if self.filter.excludes(&path) {
            tracing::debug!("Target is excluded from scanning");
            let stats = ScanStats { skipped: 1, ..ScanStats::default() };
            return Ok(ScanOutcome { stats, ..ScanOutcome::default() });
        }

        let storage = self.storage_id().await?;
        let mut walk = Walk::new(storage, mode, reuse);
        let root = match self.scan_target(&mut walk, &path).await {
            Ok(root) => root,
            Err(err) => {
                if matches!(&*err, ErrorKind::BackendUnavailable(_))
                    && let Err(mark) = self.storages.set_availability(storage, false).await
                {
                    tracing::warn!(error = %mark, "Could not mark storage unavailable");
                }
                return Err(err);
            },
        };
        self.storages.set_availability(storage, true).await.or_raise(|| ErrorKind::Cache)?;

        tracing::info!(stats = %walk.stats, failures = walk.failures.len(), "Scan finished");
        Ok(ScanOutcome { root, failures: walk.failures, stats: walk.stats })
    }

    async fn scan_target(&self, walk: &mut Walk, path: &Path) -> Result<Option<FileRecord>> {
        if path.as_os_str().is_empty() {
            return self.scan_folder(walk, path, None).await;
        }
        if !self.ensure_ancestors(walk, path).await? {
            tracing::debug!("Target's parent no longer exists");
            return Ok(None);
        }

        let before = self.files.get(walk.storage, path).await.or_raise(|| ErrorKind::Cache)?;
        let entry = match self.backend.stat(path).await {
            Ok(entry) => entry,
            Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => {
                walk.stats.removed += self.files.remove(walk.storage, path, true).await.or_raise(|| ErrorKind::Cache)?;
                return Ok(None);
            },
            Err(err) => return Err(self.backend_error(err, path)),
        };
        walk.stats.scanned += 1;
        let before = self.drop_if_kind_changed(walk, before, &entry).await?;

        let record = if entry.is_dir() {
            match self.scan_folder(walk, path, Some(&entry)).await? {
                Some(record) => record,
                None => return Ok(None),
            }
        } else {
            let _guard = self.lock(path).await?;
            let attributes = self.attributes(walk, &entry, before.as_ref());
            self.files.put(walk.storage, path, &attributes).await.or_raise(|| ErrorKind::Cache)?
        };
        walk.tally(before.as_ref(), &record);

        if before.as_ref().is_none_or(|before| before.size != record.size) {
            self.invalidate_ancestors(walk.storage, path).await?;
        }
        Ok(Some(record))
    }

    /// Record any uncached ancestor of `path` from the backend, so the
    /// target has a parent to link to. Returns `false` if an ancestor is
    /// gone (or isn't a folder), in which case the target is too.
    async fn ensure_ancestors(&self, walk: &mut Walk, path: &Path) -> Result<bool> {
        let mut ancestors: Vec<&Path> = path.ancestors().skip(1).filter(|a| !a.as_os_str().is_empty()).collect();
        ancestors.reverse();
        for ancestor in ancestors {
            if self.files.get(walk.storage, ancestor).await.or_raise(|| ErrorKind::Cache)?.is_some() {
                continue;
            }
            let entry = match self.backend.stat(ancestor).await {
                Ok(entry) if entry.is_dir() => entry,
                Ok(_) => return Ok(false),
                Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => return Ok(false),
                Err(err) => return Err(self.backend_error(err, ancestor)),
            };
            let attributes = FileAttributes { size: None, ..self.attributes(walk, &entry, None) };
            self.files.put(walk.storage, ancestor, &attributes).await.or_raise(|| ErrorKind::Cache)?;
            walk.stats.added += 1;
            tracing::debug!(path = %ancestor.display(), "Recorded missing ancestor");
        }
        Ok(true)
    }

    /// Scan the children of the folder at `path`, then store the folder.
    ///
    /// `entry` is the folder's own fresh metadata (`None` for the root).
    /// Returns `None` if the folder disappeared before it could be listed.
    fn scan_folder<'a>(
        &'a self,
        walk: &'a mut Walk,
        path: &'a Path,
        entry: Option<&'a Entry>,
    ) -> BoxFuture<'a, Result<Option<FileRecord>>> {
        Box::pin(async move {
            let storage = walk.storage;
            let _guard = self.lock(path).await?;

            let listing = match self.list(walk, path).await {
                Ok(listing) => listing,
                Err(err) if !path.as_os_str().is_empty() && matches!(&*err, StorageErrorKind::NotFound(_)) => {
                    walk.stats.removed += self.files.remove(storage, path, true).await.or_raise(|| ErrorKind::Cache)?;
                    tracing::debug!(path = %path.display(), "Folder vanished before it could be listed");
                    return Ok(None);
                },
                Err(err) => return Err(self.backend_error(err, path)),
            };
            let before = self.files.get(storage, path).await.or_raise(|| ErrorKind::Cache)?;
            if before.is_none()
                && let Some(entry) = entry
            {
                // Children need a parent row to link to.
                let placeholder = FileAttributes { size: None, ..self.attributes(walk, entry, None) };
                self.files.put(storage, path, &placeholder).await.or_raise(|| ErrorKind::Cache)?;
            }
            let cached: BTreeMap<String, FileRecord> = self
                .files
                .children(storage, path)
                .await
                .or_raise(|| ErrorKind::Cache)?
                .into_iter()
                .map(|record| (record.name.clone(), record))
                .collect();

            let mut seen = HashSet::with_capacity(listing.len());
            let mut children = Vec::with_capacity(listing.len());
            let mut changed = false;
            let mut incomplete = false;
            for child in listing {
                let Some(name) = child.name().map(str::to_string) else {
                    continue;
                };
                if self.filter.excludes_name(&name) {
                    tracing::debug!(path = %child.path.display(), "Skipping excluded entry");
                    walk.stats.skipped += 1;
                    continue;
                }
                seen.insert(name.clone());
                walk.stats.scanned += 1;
                let child_path = child.path.clone();
                match self.scan_child(walk, child, cached.get(&name)).await {
                    Ok(Some((record, child_changed))) => {
                        changed |= child_changed;
                        children.push(record);
                    },
                    Ok(None) => changed = true,
                    Err(err) if err.is_subtree_failure() => {
                        tracing::warn!(path = %child_path.display(), error = %err, "Subtree not scanned; leaving it incomplete");
                        if cached.get(&name).is_some_and(FileRecord::is_dir) {
                            self.files.set_size(storage, &child_path, None).await.or_raise(|| ErrorKind::Cache)?;
                        }
                        walk.failures.push(ScanFailure { path: child_path, error: err });
                        incomplete = true;
                    },
                    Err(err) => return Err(err),
                }
            }

            for (name, record) in &cached {
                if seen.contains(name) || self.filter.excludes_name(name) {
                    continue;
                }
                walk.stats.removed += self.files.remove(storage, &record.path, true).await.or_raise(|| ErrorKind::Cache)?;
                tracing::debug!(path = %record.path.display(), "Removed entry no longer on the backend");
                changed = true;
            }

            let size = match incomplete {
                true => None,
                false => children.iter().map(|child| child.size).sum::<Option<u64>>(),
            };
            let reported = entry.and_then(|entry| entry.mtime).map(whole_seconds);
            let mtime = reported
                .or_else(|| children.iter().map(|child| child.mtime).max())
                .or_else(|| before.as_ref().map(|before| before.mtime))
                .unwrap_or(walk.started);
            let storage_mtime = reported.unwrap_or(mtime);
            changed |= before.as_ref().is_none_or(|before| before.size != size || before.storage_mtime != storage_mtime);

            let etag = match (entry.and_then(|entry| entry.etag.clone()), &before) {
                (Some(etag), _) => etag,
                (None, Some(before)) if !changed && !before.etag.is_empty() => before.etag.clone(),
                (None, _) => fresh_etag(path, size, mtime, walk.started),
            };
            let attributes = FileAttributes {
                size,
                mtime,
                storage_mtime,
                etag,
                mimetype: mimetype::DIRECTORY.to_string(),
                permissions: entry
                    .map(|entry| entry.permissions)
                    .or(before.as_ref().map(|before| before.permissions))
                    .unwrap_or(filecache_storage::Permissions::ALL),
                encrypted: before.as_ref().is_some_and(|before| before.encrypted),
            };
            let record = self.files.put(storage, path, &attributes).await.or_raise(|| ErrorKind::Cache)?;
            tracing::debug!(path = %path.display(), size = ?record.size, "Folder scanned");
            Ok(Some(record))
        })
    }

    /// Reconcile one listed child. Returns its stored record and whether it
    /// changed, or `None` if it vanished in the meantime.
    async fn scan_child(
        &self,
        walk: &mut Walk,
        listed: Entry,
        cached: Option<&FileRecord>,
    ) -> Result<Option<(FileRecord, bool)>> {
        let path = listed.path.clone();
        let cached = self.drop_if_kind_changed(walk, cached.cloned(), &listed).await?;
        let unchanged = cached
            .as_ref()
            .is_some_and(|cached| Some(cached.storage_mtime) == listed.mtime.map(whole_seconds));

        let entry = match &cached {
            Some(cached) if unchanged && walk.reuse.contains(ReuseFlags::ETAG) => {
                walk.stats.reused += 1;
                if !self.descends(walk, cached.is_dir(), Some(cached)) {
                    return Ok(Some((cached.clone(), false)));
                }
                listed
            },
            Some(_) => match self.backend.stat(&path).await {
                Ok(fresh) => fresh,
                Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => {
                    walk.stats.removed += self.files.remove(walk.storage, &path, true).await.or_raise(|| ErrorKind::Cache)?;
                    return Ok(None);
                },
                Err(err) => return Err(self.backend_error(err, &path)),
            },
            None => listed,
        };

        if self.descends(walk, entry.is_dir(), cached.as_ref()) {
            let Some(record) = self.scan_folder(walk, &path, Some(&entry)).await? else {
                return Ok(None);
            };
            let changed = walk.tally(cached.as_ref(), &record);
            return Ok(Some((record, changed)));
        }

        let _guard = self.lock(&path).await?;
        let attributes = self.attributes(walk, &entry, cached.as_ref());
        let record = self.files.put(walk.storage, &path, &attributes).await.or_raise(|| ErrorKind::Cache)?;
        let changed = walk.tally(cached.as_ref(), &record);
        Ok(Some((record, changed)))
    }

    fn descends(&self, walk: &Walk, is_dir: bool, cached: Option<&FileRecord>) -> bool {
        is_dir
            && match walk.mode {
                ScanMode::Shallow => false,
                ScanMode::Recursive => true,
                ScanMode::RecursiveIncomplete => cached.is_none_or(FileRecord::is_incomplete),
            }
    }

    /// A cached file that is now a folder (or the reverse) is dropped
    /// before it is stored again, so no stale children hang off it.
    async fn drop_if_kind_changed(
        &self,
        walk: &mut Walk,
        cached: Option<FileRecord>,
        entry: &Entry,
    ) -> Result<Option<FileRecord>> {
        match cached {
            Some(record) if record.is_dir() != entry.is_dir() => {
                walk.stats.removed +=
                    self.files.remove(walk.storage, &record.path, true).await.or_raise(|| ErrorKind::Cache)?;
                Ok(None)
            },
            other => Ok(other),
        }
    }

    /// Attributes for `entry`, reusing cached values where the entry's
    /// storage mtime shows nothing changed.
    fn attributes(&self, walk: &Walk, entry: &Entry, cached: Option<&FileRecord>) -> FileAttributes {
        let storage_mtime = entry
            .mtime
            .map(whole_seconds)
            .or(cached.map(|cached| cached.storage_mtime))
            .unwrap_or(walk.started);
        let unchanged = cached.filter(|cached| cached.storage_mtime == storage_mtime);
        let size = match entry.size {
            Some(size) => Some(size),
            None if walk.reuse.contains(ReuseFlags::SIZE) => unchanged.and_then(|cached| cached.size),
            None => None,
        };
        let etag = match (&entry.etag, unchanged) {
            (Some(etag), _) => etag.clone(),
            (None, Some(cached)) if cached.size == size && !cached.etag.is_empty() => cached.etag.clone(),
            (None, _) => fresh_etag(&entry.path, size, storage_mtime, walk.started),
        };
        FileAttributes {
            size,
            mtime: storage_mtime,
            storage_mtime,
            etag,
            mimetype: entry.mimetype.clone(),
            permissions: entry.permissions,
            encrypted: cached.is_some_and(|cached| cached.encrypted),
        }
    }

    /// Collect a folder's listing, skipping entries the backend could not
    /// represent.
    async fn list(&self, walk: &mut Walk, dir: &Path) -> std::result::Result<Vec<Entry>, StorageError> {
        let mut stream = self.backend.list_stream(dir);
        let mut entries = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(entry) if entry.is_child_of(dir) => entries.push(entry),
                Ok(entry) => {
                    tracing::warn!(dir = %dir.display(), path = %entry.path.display(), "Skipping entry listed outside its folder");
                    walk.stats.skipped += 1;
                },
                Err(err) if matches!(&*err, StorageErrorKind::MalformedEntry(_)) => {
                    tracing::warn!(dir = %dir.display(), error = %err, "Skipping malformed entry");
                    walk.stats.skipped += 1;
                },
                Err(err) => return Err(err),
            }
        }
        Ok(entries)
    }

    /// Mark every ancestor of `path` as needing a rescan, since their
    /// aggregated sizes no longer add up.
    async fn invalidate_ancestors(&self, storage: StorageId, path: &Path) -> Result<()> {
        for ancestor in path.ancestors().skip(1) {
            self.files.set_size(storage, ancestor, None).await.or_raise(|| ErrorKind::Cache)?;
        }
        Ok(())
    }

    async fn lock(&self, path: &Path) -> Result<Option<LockGuard>> {
        let Some(locks) = &self.locks else {
            return Ok(None);
        };
        locks
            .acquire_shared(self.backend.identifier(), path)
            .await
            .map(Some)
            .or_raise(|| ErrorKind::Locked(path.to_path_buf()))
    }

    fn backend_error(&self, err: StorageError, path: &Path) -> Error {
        let kind = match &*err {
            StorageErrorKind::Unavailable(_) | StorageErrorKind::Io(_) => {
                ErrorKind::BackendUnavailable(self.backend.identifier().to_string())
            },
            StorageErrorKind::Locked(locked) => ErrorKind::Locked(locked.clone()),
            _ => ErrorKind::Backend(path.to_path_buf()),
        };
        err.raise(kind)
    }
}

/// The cache keeps whole seconds; compare backend times the same way.
fn whole_seconds(time: UtcDateTime) -> UtcDateTime {
    time.replace_nanosecond(0).unwrap_or(time)
}

/// A change marker for entries the backend reports none for. The scan
/// time is mixed in so a rewritten entry never repeats an old etag.
fn fresh_etag(path: &Path, size: Option<u64>, mtime: UtcDateTime, scanned_at: UtcDateTime) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    hasher.update(&size.unwrap_or(u64::MAX).to_le_bytes());
    hasher.update(&mtime.unix_timestamp().to_le_bytes());
    hasher.update(&scanned_at.unix_timestamp_nanos().to_le_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}
