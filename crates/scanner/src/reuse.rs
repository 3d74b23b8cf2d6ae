use derive_more::{Display, Error};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Which cached metadata a scan may trust instead of re-fetching it.
///
/// Both flags only apply to a child whose cached storage mtime matches
/// what the backend lists now.
///
/// - [`ETAG`](Self::ETAG): keep the cached record as is; no `stat` call.
/// - [`SIZE`](Self::SIZE): keep the cached size when the backend can't
///   report one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ReuseFlags(u8);

impl ReuseFlags {
    pub const NONE: Self = Self(0);
    pub const ETAG: Self = Self(1);
    pub const SIZE: Self = Self(2);
    pub const ALL: Self = Self(3);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ReuseFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}
impl BitOrAssign for ReuseFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for ReuseFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::ETAG), self.contains(Self::SIZE)) {
            (true, true) => f.write_str("etag,size"),
            (true, false) => f.write_str("etag"),
            (false, true) => f.write_str("size"),
            (false, false) => f.write_str("none"),
        }
    }
}

#[derive(Debug, Display, Error)]
#[display("unknown reuse flag: {_0}")]
pub struct UnknownReuseFlag(#[error(not(source))] pub String);

/// Parses a comma separated list such as `etag,size`, or `none`.
impl FromStr for ReuseFlags {
    type Err = UnknownReuseFlag;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',').map(str::trim).filter(|flag| !flag.is_empty()).try_fold(Self::NONE, |flags, flag| {
            match flag.to_ascii_lowercase().as_str() {
                "etag" => Ok(flags | Self::ETAG),
                "size" => Ok(flags | Self::SIZE),
                "all" => Ok(flags | Self::ALL),
                "none" => Ok(flags),
                _ => Err(UnknownReuseFlag(flag.to_string())),
            }
        })
    }
}

/// How far below the target a scan descends.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash)]
pub enum ScanMode {
    /// Only the immediate children of the target.
    #[display("shallow")]
    Shallow,
    /// The whole subtree, depth first.
    #[default]
    #[display("recursive")]
    Recursive,
    /// Descend only into folders that are new or not fully scanned.
    #[display("recursive-incomplete")]
    RecursiveIncomplete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_contains() {
        let flags = ReuseFlags::ETAG | ReuseFlags::SIZE;
        assert!(flags.contains(ReuseFlags::ETAG));
        assert!(flags.contains(ReuseFlags::SIZE));
        assert_eq!(flags, ReuseFlags::ALL);
        assert!(!ReuseFlags::SIZE.contains(ReuseFlags::ETAG));
        assert!(ReuseFlags::NONE.is_empty());
        assert!(!ReuseFlags::NONE.contains(ReuseFlags::ETAG));
    }

    #[rstest]
    #[case("etag", ReuseFlags::ETAG)]
    #[case("size", ReuseFlags::SIZE)]
    #[case("etag,size", ReuseFlags::ALL)]
    #[case(" SIZE , etag ", ReuseFlags::ALL)]
    #[case("none", ReuseFlags::NONE)]
    #[case("", ReuseFlags::NONE)]
    fn test_parse(#[case] input: &str, #[case] expected: ReuseFlags) {
        assert_eq!(input.parse::<ReuseFlags>().unwrap(), expected);
    }

    #[test]
    fn test_parse_unknown() {
        let err = "etag,mtime".parse::<ReuseFlags>().unwrap_err();
        assert_eq!(err.0, "mtime");
    }

    #[test]
    fn test_display_parses_back() {
        for flags in [ReuseFlags::NONE, ReuseFlags::ETAG, ReuseFlags::SIZE, ReuseFlags::ALL] {
            assert_eq!(flags.to_string().parse::<ReuseFlags>().unwrap(), flags);
        }
    }
}
