//! One-time repair of home storage identifiers.
//!
//! See [`StorageIdentityMigrator`] for the algorithm.

pub mod error;
mod flag;
mod identifier;
mod migrator;
mod users;

pub use crate::flag::CompletionFlag;
pub use crate::identifier::{CANONICAL_KIND, DataDirectory, LEGACY_KIND, canonical_identifier, is_valid_user};
pub use crate::migrator::{MIGRATION_NAME, MigrationReport, StorageIdentityMigrator, UserOutcome, UserReport};
pub use crate::users::{StaticUsers, UserDirectory};
