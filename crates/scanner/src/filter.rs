//! Paths the scanner must leave alone.

use std::collections::BTreeSet;
use std::path::{Component, Path};

/// Suffix of files (and folders) that are still being uploaded.
pub const PARTIAL_SUFFIX: &str = ".part";

pub const DEFAULT_BLACKLIST: &[&str] = &[".htaccess"];

/// Decides which paths are excluded from scanning.
///
/// An excluded path is never scanned and never removed from the cache,
/// whatever state its record is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    blacklist: BTreeSet<String>,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self::new(DEFAULT_BLACKLIST.iter().copied())
    }
}

impl ScanFilter {
    pub fn new(blacklist: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { blacklist: blacklist.into_iter().map(Into::into).collect() }
    }

    pub fn is_partial(name: &str) -> bool {
        name.ends_with(PARTIAL_SUFFIX)
    }

    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist.contains(name)
    }

    /// Whether `name`, as a single path component, is excluded.
    pub fn excludes_name(&self, name: &str) -> bool {
        Self::is_partial(name) || self.is_blacklisted(name)
    }

    /// Whether any component of `path` is excluded, which also covers
    /// everything inside a `*.part` folder.
    pub fn excludes(&self, path: impl AsRef<Path>) -> bool {
        path.as_ref().components().any(|component| match component {
            Component::Normal(name) => name.to_str().is_some_and(|name| self.excludes_name(name)),
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("upload.bin.part", true)]
    #[case("docs/upload.bin.part", true)]
    #[case("transfer.part/chunk-0001", true)]
    #[case(".htaccess", true)]
    #[case("public/.htaccess", true)]
    #[case("docs/partial.txt", false)]
    #[case("part", false)]
    #[case("", false)]
    fn test_default_excludes(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(ScanFilter::default().excludes(path), expected);
    }

    #[test]
    fn test_custom_blacklist() {
        let filter = ScanFilter::new(["Thumbs.db", ".DS_Store"]);
        assert!(filter.excludes("photos/Thumbs.db"));
        assert!(!filter.excludes(".htaccess"));
        assert!(filter.excludes("still.part"));
    }
}
