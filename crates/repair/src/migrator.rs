//! Storage identity migration.
//!
//! Home storages used to be cached under `local::<datadir><user>/` and are
//! now cached under `home::<user>`. For each known user the migrator
//! resolves both identifiers and:
//!
//! | legacy | canonical | action |
//! |--------|-----------|--------|
//! | -      | -         | nothing |
//! | -      | yes       | nothing |
//! | yes    | -         | rename the legacy id in place |
//! | data   | no data   | move legacy rows onto canonical, drop legacy |
//! | no data| any       | drop legacy |
//! | data   | data      | conflict: touch nothing, warn |
//!
//! Each user's steps run in one transaction. Once every user has been
//! processed the completion flag is set and later runs do nothing.
//!
//! The migrator assumes no scan is writing to the storages being migrated
//! while it runs. Nothing enforces this; run it before starting scanners.

use crate::error::{ErrorKind, Result};
use crate::flag::CompletionFlag;
use crate::identifier::{DataDirectory, canonical_identifier, is_valid_user};
use crate::users::UserDirectory;
use exn::ResultExt;
use filecache_cache::{Database, StorageId, StorageTable};
use std::collections::HashSet;
use std::fmt;
use tracing::instrument;

/// Name of the completion flag in the cache database.
pub const MIGRATION_NAME: &str = "home_storage_identifiers";

/// What happened to one user's storages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutcome {
    /// Neither identifier is known.
    Untouched,
    /// Only the canonical identifier is known.
    AlreadyCanonical,
    /// The legacy numeric id now answers to the canonical identifier.
    Renamed { storage: StorageId },
    /// Legacy rows moved onto the canonical storage; legacy id dropped.
    MergedLegacyData { from: StorageId, into: StorageId, rows: u64 },
    /// The legacy storage had no cached rows and was dropped.
    RemovedEmptyLegacy { storage: StorageId },
    /// Both storages hold cached rows. Left exactly as found.
    Conflict { legacy: String },
}
impl UserOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn changed_anything(&self) -> bool {
        matches!(self, Self::Renamed { .. } | Self::MergedLegacyData { .. } | Self::RemovedEmptyLegacy { .. })
    }
}
impl fmt::Display for UserOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untouched => f.write_str("no home storage"),
            Self::AlreadyCanonical => f.write_str("already canonical"),
            Self::Renamed { storage } => write!(f, "renamed storage {storage}"),
            Self::MergedLegacyData { from, into, rows } => write!(f, "moved {rows} rows from storage {from} to {into}"),
            Self::RemovedEmptyLegacy { storage } => write!(f, "removed empty legacy storage {storage}"),
            Self::Conflict { legacy } => write!(f, "conflict: {legacy} and its home storage both hold data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserReport {
    pub user: String,
    pub outcome: UserOutcome,
}

/// Result of one migration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// The flag was already set; nothing was looked at.
    pub already_completed: bool,
    pub outcomes: Vec<UserReport>,
    /// Legacy-shaped identifiers whose user isn't in the directory. Left
    /// untouched.
    pub unclaimed: Vec<String>,
}
impl MigrationReport {
    pub fn conflicts(&self) -> impl Iterator<Item = &UserReport> {
        self.outcomes.iter().filter(|report| report.outcome.is_conflict())
    }

    pub fn changed(&self) -> usize {
        self.outcomes.iter().filter(|report| report.outcome.changed_anything()).count()
    }
}

/// Merges legacy home storage identifiers into canonical ones, once.
pub struct StorageIdentityMigrator<U> {
    db: Database,
    users: U,
    data_directory: DataDirectory,
    flag: CompletionFlag,
}

impl<U: UserDirectory> StorageIdentityMigrator<U> {
    pub fn new(db: &Database, users: U, data_directory: DataDirectory) -> Self {
        Self {
            db: db.clone(),
            flag: CompletionFlag::new(db, MIGRATION_NAME),
            users,
            data_directory,
        }
    }

    pub fn flag(&self) -> &CompletionFlag {
        &self.flag
    }

    /// Run the pass, unless a previous pass already completed.
    ///
    /// Any `Err` means the flag is still unset. Users processed before the
    /// failure keep their (committed) changes; re-running them is a no-op
    /// because their legacy identifier no longer resolves.
    #[instrument(level = "info", skip(self), fields(data_directory = self.data_directory.as_str()))]
    pub async fn run(&self) -> Result<MigrationReport> {
        if self.flag.is_set().await? {
            tracing::debug!("Storage identity migration already completed");
            return Ok(MigrationReport { already_completed: true, ..MigrationReport::default() });
        }

        let users = self.users.users().await.or_raise(|| ErrorKind::UserDirectory)?;
        let mut report = MigrationReport::default();
        for user in &users {
            if !is_valid_user(user) {
                tracing::warn!(user = user.as_str(), "Skipping user id that can't form a storage identifier");
                continue;
            }
            let outcome = self.migrate_user(user).await.or_raise(|| ErrorKind::User(user.clone()))?;
            if let UserOutcome::Conflict { legacy } = &outcome {
                tracing::warn!(
                    user = user.as_str(),
                    legacy = legacy.as_str(),
                    "Legacy and home storages both hold cached data; leaving both untouched"
                );
            }
            report.outcomes.push(UserReport { user: user.clone(), outcome });
        }
        report.unclaimed = self.unclaimed(&users).await?;
        for identifier in &report.unclaimed {
            tracing::info!(identifier = identifier.as_str(), "Legacy home storage has no matching user; leaving it untouched");
        }

        self.flag.set().await?;
        tracing::info!(
            users = report.outcomes.len(),
            changed = report.changed(),
            conflicts = report.conflicts().count(),
            unclaimed = report.unclaimed.len(),
            "Storage identity migration completed"
        );
        Ok(report)
    }

    #[instrument(level = "debug", skip(self))]
    async fn migrate_user(&self, user: &str) -> Result<UserOutcome> {
        let legacy = self.data_directory.legacy_identifier(user);
        let canonical = canonical_identifier(user);

        let mut tx = self.db.begin().await.or_raise(|| ErrorKind::Cache)?;
        let legacy_id = tx.resolve(&legacy).await.or_raise(|| ErrorKind::Cache)?;
        let canonical_id = tx.resolve(&canonical).await.or_raise(|| ErrorKind::Cache)?;
        let outcome = match (legacy_id, canonical_id) {
            (None, None) => UserOutcome::Untouched,
            (None, Some(_)) => UserOutcome::AlreadyCanonical,
            (Some(storage), None) => {
                tx.rename_storage(storage, &canonical).await.or_raise(|| ErrorKind::Cache)?;
                UserOutcome::Renamed { storage }
            },
            (Some(from), Some(into)) => {
                let legacy_data = tx.has_any_data(from).await.or_raise(|| ErrorKind::Cache)?;
                let canonical_data = tx.has_any_data(into).await.or_raise(|| ErrorKind::Cache)?;
                match (legacy_data, canonical_data) {
                    (true, true) => UserOutcome::Conflict { legacy },
                    (true, false) => {
                        let rows = tx.repoint_storage(from, into).await.or_raise(|| ErrorKind::Cache)?;
                        tx.remove_storage(&legacy).await.or_raise(|| ErrorKind::Cache)?;
                        UserOutcome::MergedLegacyData { from, into, rows }
                    },
                    // An unscanned legacy storage also has no rows, so it is
                    // dropped here even if its backend still holds files.
                    (false, _) => {
                        tx.remove_storage(&legacy).await.or_raise(|| ErrorKind::Cache)?;
                        UserOutcome::RemovedEmptyLegacy { storage: from }
                    },
                }
            },
        };
        tx.commit().await.or_raise(|| ErrorKind::Cache)?;
        tracing::debug!(%outcome, "User migrated");
        Ok(outcome)
    }

    /// Legacy-shaped identifiers under the data directory whose user is not
    /// in `users`.
    async fn unclaimed(&self, users: &[String]) -> Result<Vec<String>> {
        let known: HashSet<&str> = users.iter().map(String::as_str).collect();
        let candidates = StorageTable::from(&self.db)
            .list_with_prefix(&self.data_directory.legacy_prefix())
            .await
            .or_raise(|| ErrorKind::Cache)?;
        Ok(candidates
            .into_iter()
            .filter(|record| {
                self.data_directory.legacy_user(&record.identifier).is_some_and(|user| !known.contains(user))
            })
            .map(|record| record.identifier)
            .collect())
    }
}
