use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Permission flags reported by a backend for a single entry.
///
/// Persisted as the raw bit pattern, so the values of the constants must
/// never change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Permissions(u32);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const UPDATE: Self = Self(2);
    pub const CREATE: Self = Self(4);
    pub const DELETE: Self = Self(8);
    pub const SHARE: Self = Self(16);
    pub const ALL: Self = Self(31);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from a persisted bit pattern, dropping unknown bits.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for Permissions {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}
impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, letter) in [
            (Self::READ, 'R'),
            (Self::UPDATE, 'U'),
            (Self::CREATE, 'C'),
            (Self::DELETE, 'D'),
            (Self::SHARE, 'S'),
        ] {
            f.write_fmt(format_args!("{}", if self.contains(flag) { letter } else { '-' }))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let perms = Permissions::READ | Permissions::UPDATE;
        assert!(perms.contains(Permissions::READ));
        assert!(perms.contains(Permissions::READ | Permissions::UPDATE));
        assert!(!perms.contains(Permissions::DELETE));
        assert!(Permissions::ALL.contains(perms));
        assert!(perms.contains(Permissions::NONE));
    }

    #[test]
    fn test_truncate_unknown_bits() {
        assert_eq!(Permissions::from_bits_truncate(0xff), Permissions::ALL);
        assert_eq!(Permissions::from_bits_truncate(9).bits(), 9);
    }

    #[test]
    fn test_display() {
        assert_eq!(Permissions::ALL.to_string(), "RUCDS");
        assert_eq!(Permissions::READ.to_string(), "R----");
        assert_eq!(Permissions::ALL.difference(Permissions::SHARE).to_string(), "RUCD-");
    }
}
