//! Path validation and security utilities.
//!
//! Every path handed to a backend, or written to the cache, is relative to
//! the storage root. The root itself is the empty path.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Normalizes a storage path, allowing the root (empty path).
///
/// `.` components, repeated and trailing separators are dropped, `..` is
/// resolved, and anything escaping the root is rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use filecache_storage::normalize_path;
/// assert_eq!(normalize_path("").unwrap(), Path::new(""));
/// assert_eq!(normalize_path("./docs//a/../b/").unwrap(), Path::new("docs/b"));
/// assert!(normalize_path("../etc/passwd").is_err());
/// ```
pub fn normalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls, reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    Ok(components.into_iter().collect())
}

/// Validates a storage path that must name something below the root.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use filecache_storage::validate_path;
/// assert!(validate_path("docs/report.pdf").is_ok());
/// assert!(validate_path("a/../../b").is_err());
/// assert!(validate_path("").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let normalized = normalize(path.as_ref())?;
    match normalized.as_os_str().is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(normalized),
    }
}

/// Checks that a name returned by a listing is a single usable component.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Render a normalized path the way it is stored: UTF-8, `/` separated,
/// empty for the root. Returns `None` for non-UTF-8 paths.
pub fn to_storage_string(path: impl AsRef<Path>) -> Option<String> {
    let mut out = String::new();
    for component in path.as_ref().components() {
        if let Component::Normal(s) = component {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(s.to_str()?);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("docs/report.pdf", "docs/report.pdf")]
    #[case("a//b//c", "a/b/c")]
    #[case("a/./b/./c", "a/b/c")]
    #[case("a/b/..", "a")]
    #[case("docs/", "docs")]
    #[case("/docs", "docs")]
    fn test_valid_paths(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("a/../../b")]
    #[case("..")]
    #[case("a\0b")]
    #[case("")]
    #[case("./.")]
    #[case("//")]
    fn test_invalid_paths(#[case] input: &str) {
        assert!(validate(input).is_err());
    }

    #[test]
    fn test_normalize_allows_root() {
        assert_eq!(normalize("").unwrap(), Path::new(""));
        assert_eq!(normalize("./").unwrap(), Path::new(""));
        assert_eq!(normalize("a/..").unwrap(), Path::new(""));
        assert!(normalize("..").is_err());
    }

    #[rstest]
    #[case("file.txt", true)]
    #[case(".hidden", true)]
    #[case("", false)]
    #[case(".", false)]
    #[case("..", false)]
    #[case("a/b", false)]
    #[case("a\\b", false)]
    #[case("a\0", false)]
    fn test_is_valid_name(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_valid_name(name), expected);
    }

    #[test]
    fn test_to_storage_string() {
        assert_eq!(to_storage_string("").unwrap(), "");
        assert_eq!(to_storage_string("a/b/c.txt").unwrap(), "a/b/c.txt");
    }
}
