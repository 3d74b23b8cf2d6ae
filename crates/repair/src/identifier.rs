//! The two home storage identifier shapes.
//!
//! - legacy: `local::<datadir><user>/`
//! - canonical: `home::<user>`
//!
//! Recognition is exact: an identifier is only the legacy home storage of a
//! user if it is *precisely* the string built from the configured data
//! directory and that user's id. Local mounts elsewhere, or nested below a
//! user's folder, share the `local::` kind but never match.

pub const LEGACY_KIND: &str = "local::";
pub const CANONICAL_KIND: &str = "home::";

/// The configured data directory, normalized to end in exactly one `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirectory(String);

impl DataDirectory {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(format!("{}/", path.as_ref().trim_end_matches('/')))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn legacy_identifier(&self, user: &str) -> String {
        format!("{LEGACY_KIND}{}{user}/", self.0)
    }

    /// Prefix shared by every legacy home identifier under this directory.
    pub fn legacy_prefix(&self) -> String {
        format!("{LEGACY_KIND}{}", self.0)
    }

    /// The user a legacy home identifier belongs to, if it is one.
    pub fn legacy_user<'a>(&self, identifier: &'a str) -> Option<&'a str> {
        let user = identifier.strip_prefix(LEGACY_KIND)?.strip_prefix(self.0.as_str())?.strip_suffix('/')?;
        is_valid_user(user).then_some(user)
    }

    pub fn is_legacy_for(&self, identifier: &str, user: &str) -> bool {
        self.legacy_user(identifier) == Some(user)
    }
}

pub fn canonical_identifier(user: &str) -> String {
    format!("{CANONICAL_KIND}{user}")
}

/// A user id usable in either identifier shape: non-empty, one path
/// component.
pub fn is_valid_user(user: &str) -> bool {
    !user.is_empty() && user != "." && user != ".." && !user.contains(['/', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/srv/data", "/srv/data/")]
    #[case("/srv/data/", "/srv/data/")]
    #[case("/srv/data///", "/srv/data/")]
    #[case("/", "/")]
    fn test_data_directory_normalized(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(DataDirectory::new(input).as_str(), expected);
    }

    #[test]
    fn test_identifier_shapes() {
        let data = DataDirectory::new("/srv/data");
        assert_eq!(data.legacy_identifier("alice"), "local::/srv/data/alice/");
        assert_eq!(canonical_identifier("alice"), "home::alice");
    }

    #[rstest]
    #[case("local::/srv/data/alice/", Some("alice"))]
    #[case("local::/srv/data/alice", None)]
    #[case("local::/srv/data/alice/projects/", None)]
    #[case("local::/srv/data//alice/", None)]
    #[case("local::/mnt/shared/alice/", None)]
    #[case("local::/srv/data/", None)]
    #[case("home::alice", None)]
    #[case("smb::/srv/data/alice/", None)]
    fn test_legacy_user(#[case] identifier: &str, #[case] expected: Option<&str>) {
        assert_eq!(DataDirectory::new("/srv/data/").legacy_user(identifier), expected);
    }

    #[test]
    fn test_is_legacy_for_exact_user() {
        let data = DataDirectory::new("/srv/data");
        assert!(data.is_legacy_for("local::/srv/data/alice/", "alice"));
        assert!(!data.is_legacy_for("local::/srv/data/alicex/", "alice"));
        assert!(!data.is_legacy_for("local::/srv/data/alice/", "Alice"));
    }
}
