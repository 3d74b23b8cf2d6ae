//! Wiring from configuration to database, backends and scanners.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use filecache_cache::{Database, PoolSettings};
use filecache_config::{BackendConfig, Config, MountConfig};
use filecache_repair::canonical_identifier;
use filecache_scanner::{ReuseFlags, ScanFilter, Scanner};
use filecache_storage::backend::LocalBackend;
use filecache_storage::{BackendHandle, MemoryLockProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Which storages a command works on. Empty selects everything configured.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub users: Vec<String>,
    pub mounts: Vec<String>,
}
impl Selection {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.mounts.is_empty()
    }
}

pub struct App {
    pub config: Config,
    pub db: Database,
    /// Shared by every scanner so concurrent scans see each other's locks.
    pub(crate) locks: MemoryLockProvider,
}

impl App {
    #[instrument(level = "debug", skip_all, fields(database = %config.database.path.display()))]
    pub async fn open(config: Config) -> Result<Self> {
        if let Some(parent) = config.database.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Cache)?;
        }
        let settings = PoolSettings {
            max_connections: config.database.max_connections,
            busy_timeout: Duration::from_millis(config.database.busy_timeout_ms),
        };
        let db = Database::connect_with(&config.database.path, settings).await.or_raise(|| ErrorKind::Cache)?;
        Ok(Self { config, db, locks: MemoryLockProvider::default() })
    }

    pub fn reuse(&self) -> Result<ReuseFlags> {
        self.config.scanner.reuse_flags().or_raise(|| ErrorKind::Config)
    }

    /// One scanner per selected storage: home storages first, then mounts.
    pub fn scanners(&self, selection: &Selection) -> Result<Vec<Scanner>> {
        let (users, mounts): (Vec<&String>, Vec<&String>) = if selection.is_empty() {
            (self.config.users.iter().collect(), self.config.mounts.keys().collect())
        } else {
            (selection.users.iter().collect(), selection.mounts.iter().collect())
        };
        let mut scanners = Vec::with_capacity(users.len() + mounts.len());
        for user in users {
            if !self.config.users.contains(user) {
                exn::bail!(ErrorKind::UnknownUser(user.clone()));
            }
            scanners.push(self.scanner(self.home_backend(user)?));
        }
        for id in mounts {
            let mount = self.config.mounts.get(id).ok_or_raise(|| ErrorKind::UnknownMount(id.clone()))?;
            scanners.push(self.scanner(mount_backend(id, mount)?));
        }
        Ok(scanners)
    }

    /// Home storages live under the data directory but are cached as
    /// `home::<user>`.
    fn home_backend(&self, user: &str) -> Result<BackendHandle> {
        let backend = LocalBackend::new(user, self.config.home_root(user))
            .or_raise(|| ErrorKind::Storage(user.to_string()))?
            .with_identifier(canonical_identifier(user));
        Ok(Arc::new(backend))
    }

    fn scanner(&self, backend: BackendHandle) -> Scanner {
        debug!(storage = backend.identifier(), "Preparing scanner");
        let scanner = Scanner::new(backend, &self.db).with_filter(ScanFilter::new(self.config.scanner.blacklist.iter().cloned()));
        if self.config.scanner.locking {
            scanner.with_lock_provider(Arc::new(self.locks.clone()))
        } else {
            scanner.without_locking()
        }
    }
}

fn mount_backend(id: &str, mount: &MountConfig) -> Result<BackendHandle> {
    match &mount.backend {
        BackendConfig::Local { root } => {
            let backend = LocalBackend::new(id, root).or_raise(|| ErrorKind::Storage(id.to_string()))?;
            Ok(Arc::new(backend))
        },
        #[cfg(feature = "s3")]
        BackendConfig::S3 { bucket, prefix, region, endpoint, key_id, key_secret } => {
            use filecache_storage::backend::{S3Backend, S3Options};
            let options = S3Options {
                bucket: bucket.clone(),
                prefix: prefix.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                key_id: key_id.clone(),
                key_secret: key_secret.clone(),
            };
            let backend = S3Backend::new(id, options).or_raise(|| ErrorKind::Storage(id.to_string()))?;
            Ok(Arc::new(backend))
        },
        #[cfg(not(feature = "s3"))]
        BackendConfig::S3 { .. } => exn::bail!(ErrorKind::UnsupportedBackend(id.to_string())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;

    pub(crate) fn local_mount(mount_point: &str, root: &Path) -> MountConfig {
        MountConfig {
            mount_point: mount_point.to_string(),
            backend: BackendConfig::Local { root: root.to_path_buf() },
            auth: "none".to_string(),
            options: BTreeMap::new(),
            mount_options: BTreeMap::new(),
            applicable_users: Vec::new(),
            applicable_groups: Vec::new(),
        }
    }

    pub(crate) fn config_in(dir: &Path) -> Config {
        let mut config = Config { data_directory: dir.join("data"), users: vec!["alice".to_string()], ..Config::default() };
        config.database.path = dir.join("db").join("cache.db");
        config.mounts.insert("archive".to_string(), local_mount("/archive", &dir.join("archive")));
        config
    }

    #[tokio::test]
    async fn test_open_creates_database_directory() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(config_in(dir.path())).await.unwrap();
        assert!(dir.path().join("db").join("cache.db").exists());
        assert_eq!(app.reuse().unwrap(), ReuseFlags::ALL);
    }

    #[tokio::test]
    async fn test_empty_selection_takes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(config_in(dir.path())).await.unwrap();
        let scanners = app.scanners(&Selection::default()).unwrap();
        let identifiers: Vec<_> = scanners.iter().map(|s| s.identifier().to_string()).collect();
        let archive = format!("local::{}/", dir.path().join("archive").display());
        assert_eq!(identifiers, vec!["home::alice".to_string(), archive]);
    }

    #[tokio::test]
    async fn test_selection_by_mount() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(config_in(dir.path())).await.unwrap();
        let selection = Selection { mounts: vec!["archive".to_string()], ..Selection::default() };
        let scanners = app.scanners(&selection).unwrap();
        assert_eq!(scanners.len(), 1);
        assert_eq!(scanners[0].backend().name(), "archive");
    }

    #[tokio::test]
    async fn test_unknown_selection() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(config_in(dir.path())).await.unwrap();
        let selection = Selection { mounts: vec!["nope".to_string()], ..Selection::default() };
        let err = app.scanners(&selection).err().unwrap();
        assert!(matches!(&*err, ErrorKind::UnknownMount(id) if id == "nope"));
        let selection = Selection { users: vec!["mallory".to_string()], ..Selection::default() };
        let err = app.scanners(&selection).err().unwrap();
        assert!(matches!(&*err, ErrorKind::UnknownUser(user) if user == "mallory"));
    }

    #[cfg(not(feature = "s3"))]
    #[test]
    fn test_s3_mount_without_feature() {
        let mount = MountConfig {
            backend: BackendConfig::S3 {
                bucket: "b".to_string(),
                prefix: None,
                region: "us-east-1".to_string(),
                endpoint: None,
                key_id: "id".to_string(),
                key_secret: "secret".to_string(),
            },
            ..local_mount("/b", Path::new("/unused"))
        };
        let err = mount_backend("b", &mount).err().unwrap();
        assert!(matches!(&*err, ErrorKind::UnsupportedBackend(_)));
    }
}
