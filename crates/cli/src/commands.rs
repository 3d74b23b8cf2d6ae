use crate::app::{App, Selection};
use crate::error::{ErrorKind, Result};
use crate::mounts::MountListPresenter;
use clap::{Args, ValueEnum};
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};
use exn::ResultExt;
use filecache_cache::{StorageRecord, StorageTable};
use filecache_config::Config;
use filecache_repair::{DataDirectory, StaticUsers, StorageIdentityMigrator};
use filecache_scanner::{BackgroundEvent, ReuseFlags, ScanMode, ScanOutcome};
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Only the target and its direct children.
    Shallow,
    /// The whole tree below the target.
    #[default]
    Recursive,
    /// Only new or incomplete folders below the target.
    RecursiveIncomplete,
}
impl From<ModeArg> for ScanMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Shallow => ScanMode::Shallow,
            ModeArg::Recursive => ScanMode::Recursive,
            ModeArg::RecursiveIncomplete => ScanMode::RecursiveIncomplete,
        }
    }
}

#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct ScanTarget {
    /// Scan a user's home storage
    #[arg(long)]
    pub user: Option<String>,
    /// Scan a configured mount
    #[arg(long)]
    pub mount: Option<String>,
}
impl ScanTarget {
    fn selection(&self) -> Selection {
        Selection { users: self.user.iter().cloned().collect(), mounts: self.mount.iter().cloned().collect() }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ScanArgs {
    #[command(flatten)]
    pub target: ScanTarget,
    /// Path inside the storage; the storage root when omitted
    pub path: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t)]
    pub mode: ModeArg,
    /// Cached data to reuse for unchanged entries: etag, size, all, none
    #[arg(long)]
    pub reuse: Option<ReuseFlags>,
}

#[derive(Debug, Clone, Args)]
pub struct SelectionArgs {
    /// Home storage of this user (repeatable)
    #[arg(long = "user")]
    pub users: Vec<String>,
    /// Configured mount (repeatable)
    #[arg(long = "mount")]
    pub mounts: Vec<String>,
}
impl From<SelectionArgs> for Selection {
    fn from(args: SelectionArgs) -> Self {
        Selection { users: args.users, mounts: args.mounts }
    }
}

pub async fn scan(app: &App, args: ScanArgs) -> Result<()> {
    let reuse = match args.reuse {
        Some(reuse) => reuse,
        None => app.reuse()?,
    };
    let path = args.path.unwrap_or_default();
    for scanner in app.scanners(&args.target.selection())? {
        let outcome = scanner.scan(&path, args.mode.into(), reuse).await.map_err(|err| {
            let kind = ErrorKind::scan(&err);
            err.raise(kind)
        })?;
        print_outcome(scanner.identifier(), &path, &outcome);
    }
    Ok(())
}

fn print_outcome(storage: &str, path: &Path, outcome: &ScanOutcome) {
    let state = if outcome.is_complete() { "complete" } else { "incomplete" };
    println!("{storage} /{}: {} ({state})", path.display(), outcome.stats);
    for failure in &outcome.failures {
        println!("  failed /{}: {}", failure.path.display(), failure.error);
    }
}

pub async fn background_scan(app: &App, selection: Selection) -> Result<()> {
    let scanners = app.scanners(&selection)?;
    let mut events = std::pin::pin!(filecache_scanner::background_scan(&scanners));
    let mut failed = 0;
    let mut deferred = 0;
    while let Some(event) = events.next().await {
        match event {
            Ok(BackgroundEvent::Started { storage }) => info!(%storage, "Background scan started"),
            Ok(BackgroundEvent::Scanned { storage, path, outcome }) => print_outcome(&storage, &path, &outcome),
            Ok(BackgroundEvent::Finished { storage, pending: None }) => println!("{storage}: fully scanned"),
            Ok(BackgroundEvent::Finished { storage, pending: Some(path) }) => {
                println!("{storage}: /{} still incomplete, retry later", path.display());
            },
            Err(err) if err.is_retryable() => {
                deferred += 1;
                warn!(error = ?err, "Storage busy or unreachable; background scan deferred");
            },
            Err(err) => {
                failed += 1;
                warn!(error = ?err, "Background scan of a storage failed");
            },
        }
    }
    match (failed, deferred) {
        (0, 0) => Ok(()),
        (0, deferred) => exn::bail!(ErrorKind::StoragesDeferred(deferred)),
        (failed, deferred) => exn::bail!(ErrorKind::StoragesFailed(failed + deferred)),
    }
}

pub async fn repair_storage_ids(app: &App, force: bool) -> Result<()> {
    let users = StaticUsers::new(app.config.users.iter().cloned());
    let data_directory = DataDirectory::new(app.config.data_directory.to_string_lossy());
    let migrator = StorageIdentityMigrator::new(&app.db, users, data_directory);
    if force && migrator.flag().clear().await.or_raise(|| ErrorKind::Repair)? {
        info!(flag = migrator.flag().name(), "Cleared completion flag");
    }
    let report = migrator.run().await.or_raise(|| ErrorKind::Repair)?;
    if report.already_completed {
        println!("Home storage identifiers were already repaired. Use --force to run again.");
        return Ok(());
    }
    for user in &report.outcomes {
        println!("{}: {}", user.user, user.outcome);
    }
    for identifier in &report.unclaimed {
        println!("unclaimed legacy storage: {identifier}");
    }
    println!("{} users changed, {} conflicts left untouched", report.changed(), report.conflicts().count());
    Ok(())
}

#[derive(Debug, Serialize)]
struct StorageRow {
    id: i64,
    identifier: String,
    available: bool,
    last_checked: Option<String>,
}
impl From<StorageRecord> for StorageRow {
    fn from(record: StorageRecord) -> Self {
        Self {
            id: record.numeric_id.0,
            identifier: record.identifier,
            available: record.available,
            last_checked: record
                .last_checked
                .map(|at| at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string())),
        }
    }
}

pub async fn storages(app: &App, json: bool) -> Result<()> {
    let records = StorageTable::from(&app.db).list().await.or_raise(|| ErrorKind::Cache)?;
    let rows: Vec<StorageRow> = records.into_iter().map(StorageRow::from).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows).or_raise(|| ErrorKind::Output)?);
        return Ok(());
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Identifier", "Available", "Last Checked"]);
    for row in rows {
        table.add_row(vec![
            row.id.to_string(),
            row.identifier,
            String::from(if row.available { "yes" } else { "no" }),
            row.last_checked.unwrap_or_else(|| "never".to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub fn mounts(config: &Config, presenter: MountListPresenter, json: bool) -> Result<()> {
    if json {
        println!("{}", presenter.json(&config.mounts).or_raise(|| ErrorKind::Output)?);
    } else if config.mounts.is_empty() {
        println!("No mounts configured");
    } else {
        println!("{}", presenter.table(&config.mounts));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::config_in;
    use filecache_cache::FileCache;
    use filecache_repair::{CompletionFlag, MIGRATION_NAME};
    use filecache_storage::{LockKind, LockProvider};

    #[tokio::test]
    async fn test_scan_local_mount() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(config_in(dir.path())).await.unwrap();
        std::fs::create_dir_all(dir.path().join("archive/docs")).unwrap();
        std::fs::write(dir.path().join("archive/docs/a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("archive/docs/.htaccess"), b"deny").unwrap();

        let target = ScanTarget { user: None, mount: Some("archive".to_string()) };
        let args = ScanArgs { target, path: None, mode: ModeArg::Recursive, reuse: None };
        scan(&app, args).await.unwrap();

        let scanner = app.scanners(&Selection { mounts: vec!["archive".to_string()], ..Default::default() }).unwrap();
        let storage = scanner[0].storage_id().await.unwrap();
        let files = FileCache::from(&app.db);
        let root = files.get(storage, Path::new("")).await.unwrap().unwrap();
        assert_eq!(root.size, Some(5));
        assert!(files.get(storage, Path::new("docs/.htaccess")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_errors_keep_retryability() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("archive/docs")).unwrap();
        let app = App::open(config_in(dir.path())).await.unwrap();
        let target = || ScanTarget { user: None, mount: Some("archive".to_string()) };

        let args = ScanArgs { target: target(), path: Some(PathBuf::from("../etc")), mode: ModeArg::Shallow, reuse: None };
        let err = scan(&app, args).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Scan));
        assert!(!err.is_retryable());

        let identifier = app.scanners(&target().selection()).unwrap()[0].identifier().to_string();
        let _held = app.locks.acquire(&identifier, Path::new("docs"), LockKind::Exclusive).await.unwrap();
        let args = ScanArgs { target: target(), path: Some(PathBuf::from("docs")), mode: ModeArg::Shallow, reuse: None };
        let err = scan(&app, args).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ScanDeferred));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_background_scan_and_storage_listing() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(config_in(dir.path())).await.unwrap();
        background_scan(&app, Selection::default()).await.unwrap();
        let records = StorageTable::from(&app.db).list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.available));
        storages(&app, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_repair_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(config_in(dir.path())).await.unwrap();
        repair_storage_ids(&app, false).await.unwrap();
        let flag = CompletionFlag::new(&app.db, MIGRATION_NAME);
        assert!(flag.is_set().await.unwrap());
        repair_storage_ids(&app, true).await.unwrap();
    }

    #[test]
    fn test_mode_mapping() {
        assert_eq!(ScanMode::from(ModeArg::default()), ScanMode::Recursive);
        assert_eq!(ScanMode::from(ModeArg::RecursiveIncomplete), ScanMode::RecursiveIncomplete);
    }
}
