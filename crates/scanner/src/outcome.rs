use crate::error::Error;
use filecache_cache::FileRecord;
use std::fmt;
use std::path::PathBuf;

/// Counters gathered over one scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Entries looked at, whatever happened to them.
    pub scanned: u64,
    pub added: u64,
    pub updated: u64,
    /// Cache rows deleted because the backend no longer lists them.
    pub removed: u64,
    /// Entries whose cached record was kept without asking the backend.
    pub reused: u64,
    /// Partial uploads, blacklisted names and malformed entries.
    pub skipped: u64,
}
impl ScanStats {
    pub(crate) fn merge(&mut self, other: &ScanStats) {
        self.scanned += other.scanned;
        self.added += other.added;
        self.updated += other.updated;
        self.removed += other.removed;
        self.reused += other.reused;
        self.skipped += other.skipped;
    }
}
impl fmt::Display for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scanned, {} added, {} updated, {} removed, {} reused, {} skipped",
            self.scanned, self.added, self.updated, self.removed, self.reused, self.skipped
        )
    }
}

/// A subtree that could not be scanned. Its folder stays incomplete so a
/// later background pass picks it up again.
#[derive(Debug)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// The target's record after the scan; `None` if the target is
    /// excluded or no longer exists.
    pub root: Option<FileRecord>,
    pub failures: Vec<ScanFailure>,
    pub stats: ScanStats,
}
impl ScanOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
