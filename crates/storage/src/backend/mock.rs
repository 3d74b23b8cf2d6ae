//! In-memory storage backend for testing.

use super::EntryStream;
use crate::StorageBackend;
use crate::entry::{Entry, EntryKind};
use crate::error::{ErrorKind, Result};
use crate::path::{normalize as normalize_path, validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::UtcDateTime;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Node {
    kind: EntryKind,
    size: u64,
    mtime: UtcDateTime,
    etag: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<PathBuf, Node>,
    failing: BTreeSet<PathBuf>,
    denied: BTreeSet<PathBuf>,
    malformed: BTreeMap<PathBuf, Vec<String>>,
}
impl State {
    fn with_root(mtime: UtcDateTime) -> Self {
        let mut state = Self::default();
        state.nodes.insert(PathBuf::new(), Node::directory(mtime));
        state
    }

    /// Create every missing ancestor of `path` as a directory, and bump the
    /// mtime of the direct parent the way a real filesystem would.
    fn touch_ancestors(&mut self, path: &Path, mtime: UtcDateTime) {
        let mut ancestors: Vec<&Path> = path.ancestors().skip(1).collect();
        ancestors.reverse();
        for ancestor in ancestors {
            self.nodes.entry(ancestor.to_path_buf()).or_insert_with(|| Node::directory(mtime));
        }
        if let Some(parent) = path.parent()
            && let Some(node) = self.nodes.get_mut(parent)
        {
            node.mtime = mtime;
        }
    }

    fn entry(&self, path: &Path, node: &Node) -> Entry {
        match node.kind {
            EntryKind::Directory => Entry::directory(path, Some(node.mtime)),
            EntryKind::File => {
                let entry = Entry::file(path, node.size, node.mtime);
                match &node.etag {
                    Some(etag) => entry.with_etag(etag.clone()),
                    None => entry,
                }
            },
        }
    }
}
impl Node {
    fn directory(mtime: UtcDateTime) -> Self {
        Self { kind: EntryKind::Directory, size: 0, mtime, etag: None }
    }
}

/// In-memory storage backend for testing.
///
/// The tree is stored in a `BTreeMap` behind a [`RwLock`], so all trait
/// methods and test mutators operate on `&self`. Parent directories are
/// implied by the files inserted below them. Directories report no size.
///
/// Besides the tree itself, the mock can simulate an unreachable backend,
/// per-directory listing failures and malformed listing entries, and counts
/// `list_stream` and `stat` calls so tests can assert what a scan fetched.
///
/// # Examples
///
/// ```
/// use filecache_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("docs/report.pdf", b"%PDF-1.7".to_vec()),
/// ]);
/// assert!(backend.exists(Path::new("docs/report.pdf")).await?);
/// assert!(backend.exists(Path::new("docs")).await?);
///
/// backend.insert_file("notes.txt", 12).await;
/// assert_eq!(backend.list_directory(Path::new("")).await?.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    identifier: String,
    state: RwLock<State>,
    unavailable: AtomicBool,
    list_calls: AtomicUsize,
    stat_calls: AtomicUsize,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let now = UtcDateTime::now();
        let mut state = State::with_root(now);
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            state.touch_ancestors(&validated, now);
            let data: Vec<u8> = data.into();
            let size = data.len() as u64;
            state.nodes.insert(validated, Node { kind: EntryKind::File, size, mtime: now, etag: None });
        }
        Self {
            name: "mock".to_string(),
            identifier: "mock::".to_string(),
            state: RwLock::new(state),
            unavailable: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            stat_calls: AtomicUsize::new(0),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Change the storage identifier the mock reports.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Add or replace a file, stamped with the current time.
    pub async fn insert_file(&self, path: impl AsRef<Path>, size: u64) {
        self.insert_file_at(path, size, UtcDateTime::now()).await;
    }

    /// Add or replace a file with an explicit mtime.
    pub async fn insert_file_at(&self, path: impl AsRef<Path>, size: u64, mtime: UtcDateTime) {
        let path = Self::checked(path.as_ref());
        let mut state = self.state.write().await;
        state.touch_ancestors(&path, mtime);
        state.nodes.insert(path, Node { kind: EntryKind::File, size, mtime, etag: None });
    }

    /// Add a directory (and any missing ancestors).
    pub async fn insert_dir(&self, path: impl AsRef<Path>) {
        let path = Self::checked(path.as_ref());
        let now = UtcDateTime::now();
        let mut state = self.state.write().await;
        state.touch_ancestors(&path, now);
        state.nodes.entry(path).or_insert_with(|| Node::directory(now));
    }

    /// Make the backend report an etag for a file.
    pub async fn set_etag(&self, path: impl AsRef<Path>, etag: impl Into<String>) {
        let path = Self::checked(path.as_ref());
        if let Some(node) = self.state.write().await.nodes.get_mut(&path) {
            node.etag = Some(etag.into());
        }
    }

    /// Change a path's mtime without touching anything else.
    pub async fn touch(&self, path: impl AsRef<Path>, mtime: UtcDateTime) {
        let path = Self::checked(path.as_ref());
        if let Some(node) = self.state.write().await.nodes.get_mut(&path) {
            node.mtime = mtime;
        }
    }

    /// Remove a path and everything below it.
    pub async fn remove(&self, path: impl AsRef<Path>) {
        let path = Self::checked(path.as_ref());
        let mut state = self.state.write().await;
        state.nodes.retain(|candidate, _| !candidate.starts_with(&path));
        if let Some(parent) = path.parent()
            && let Some(node) = state.nodes.get_mut(parent)
        {
            node.mtime = UtcDateTime::now();
        }
    }

    /// Make every call fail with [`Unavailable`](ErrorKind::Unavailable).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make listings of `dir` fail with [`Unavailable`](ErrorKind::Unavailable).
    pub async fn fail_listing(&self, dir: impl AsRef<Path>) {
        let dir = Self::checked(dir.as_ref());
        self.state.write().await.failing.insert(dir);
    }

    /// Make listings of `dir` fail with
    /// [`PermissionDenied`](ErrorKind::PermissionDenied).
    pub async fn deny_listing(&self, dir: impl AsRef<Path>) {
        let dir = Self::checked(dir.as_ref());
        self.state.write().await.denied.insert(dir);
    }

    /// Make listings of `dir` include an entry that cannot be represented.
    pub async fn inject_malformed(&self, dir: impl AsRef<Path>, name: impl Into<String>) {
        let dir = Self::checked(dir.as_ref());
        self.state.write().await.malformed.entry(dir).or_default().push(name.into());
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.list_calls.store(0, Ordering::SeqCst);
        self.stat_calls.store(0, Ordering::SeqCst);
    }

    fn checked(path: &Path) -> PathBuf {
        match normalize_path(path) {
            Ok(path) => path,
            Err(_) => panic!("MockBackend: invalid path {}", path.display()),
        }
    }

    fn check_available(&self) -> Result<()> {
        match self.unavailable.load(Ordering::SeqCst) {
            true => exn::bail!(ErrorKind::Unavailable(format!("{} is offline", self.name))),
            false => Ok(()),
        }
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn list_stream<'a>(&'a self, dir: &'a Path) -> EntryStream<'a> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(stream! {
            if let Err(e) = self.check_available() {
                yield Err(e);
                return;
            }
            let dir = match normalize_path(dir) {
                Ok(dir) => dir,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let snapshot: Result<(Vec<Entry>, Vec<String>)> = {
                let state = self.state.read().await;
                match state.nodes.get(&dir) {
                    _ if state.failing.contains(&dir) => {
                        Err(exn::Exn::from(ErrorKind::Unavailable(format!("listing {} failed", dir.display()))))
                    },
                    _ if state.denied.contains(&dir) => Err(exn::Exn::from(ErrorKind::PermissionDenied(dir.clone()))),
                    Some(node) if node.kind == EntryKind::Directory => {
                        let entries = state
                            .nodes
                            .iter()
                            .filter(|(path, _)| path.parent() == Some(dir.as_path()) && !path.as_os_str().is_empty())
                            .map(|(path, node)| state.entry(path, node))
                            .collect();
                        Ok((entries, state.malformed.get(&dir).cloned().unwrap_or_default()))
                    },
                    _ => Err(exn::Exn::from(ErrorKind::NotFound(dir.clone()))),
                }
            };
            match snapshot {
                Ok((entries, malformed)) => {
                    for entry in entries {
                        yield Ok(entry);
                    }
                    for name in malformed {
                        yield Err(exn::Exn::from(ErrorKind::MalformedEntry(dir.join(name))));
                    }
                },
                Err(e) => yield Err(e),
            }
        })
    }

    async fn stat(&self, path: &Path) -> Result<Entry> {
        self.stat_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let path = normalize_path(path)?;
        let state = self.state.read().await;
        let node = state.nodes.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(state.entry(&path, node))
    }
}
