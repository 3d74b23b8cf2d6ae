use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use filecache_scanner::{DEFAULT_BLACKLIST, ReuseFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

const APPLICATION: &str = "filecache";

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APPLICATION)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Directory holding one sub-folder per user. Home storages are rooted
    /// at `<data_directory>/<user>`.
    pub data_directory: PathBuf,
    /// Users whose home storages exist.
    pub users: Vec<String>,
    pub scanner: ScannerConfig,
    /// Mount definitions, keyed by mount id.
    pub mounts: BTreeMap<String, MountConfig>,
}
impl Default for Config {
    fn default() -> Self {
        let data_directory = project_dirs()
            .map(|dirs| dirs.data_dir().join("data"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/filecache/data"));
        Self {
            database: DatabaseConfig::default(),
            data_directory,
            users: Vec::new(),
            scanner: ScannerConfig::default(),
            mounts: BTreeMap::new(),
        }
    }
}
impl Config {
    /// Checks what deserialization can't: absolute paths, unique mount
    /// points and well-formed scanner settings.
    pub fn validate(&self) -> Result<()> {
        if !self.data_directory.is_absolute() {
            exn::bail!(ErrorKind::RelativePath("data_directory".to_string()));
        }
        if self.database.max_connections == 0 {
            exn::bail!(ErrorKind::Invalid {
                field: "database.max_connections".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        for user in &self.users {
            if user.is_empty() || user.contains('/') || user == "." || user == ".." {
                exn::bail!(ErrorKind::Invalid {
                    field: "users".to_string(),
                    reason: format!("{user:?} is not a valid user id"),
                });
            }
        }
        self.scanner.reuse_flags()?;

        let mut mount_points = HashSet::new();
        for (id, mount) in &self.mounts {
            mount.validate(id)?;
            if !mount_points.insert(mount.normalized_mount_point()) {
                exn::bail!(ErrorKind::DuplicateMountPoint(mount.mount_point.clone()));
            }
        }
        Ok(())
    }

    /// Root directory of a user's home storage.
    pub fn home_root(&self, user: &str) -> PathBuf {
        self.data_directory.join(user)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; created on first connect.
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = project_dirs()
            .map(|dirs| dirs.data_dir().join("filecache.db"))
            .unwrap_or_else(|| PathBuf::from("filecache.db"));
        Self { path, max_connections: 4, busy_timeout_ms: 5_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Take shared/exclusive locks while scanning.
    pub locking: bool,
    /// Comma separated reuse flags (`etag`, `size`, `all`, `none`).
    pub reuse: String,
    /// Names never cached, in addition to partial uploads.
    pub blacklist: Vec<String>,
}
impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            locking: true,
            reuse: ReuseFlags::ALL.to_string(),
            blacklist: DEFAULT_BLACKLIST.iter().map(|name| name.to_string()).collect(),
        }
    }
}
impl ScannerConfig {
    pub fn reuse_flags(&self) -> Result<ReuseFlags> {
        self.reuse.parse().map_err(|err: filecache_scanner::UnknownReuseFlag| {
            exn::Exn::from(ErrorKind::Invalid { field: "scanner.reuse".to_string(), reason: err.to_string() })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Where the mount appears in a user's tree, e.g. `/archive`.
    pub mount_point: String,
    pub backend: BackendConfig,
    #[serde(default = "default_auth")]
    pub auth: String,
    /// Backend options not covered by the typed fields.
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    #[serde(default)]
    pub mount_options: BTreeMap<String, Value>,
    #[serde(default)]
    pub applicable_users: Vec<String>,
    #[serde(default)]
    pub applicable_groups: Vec<String>,
}
impl MountConfig {
    fn validate(&self, id: &str) -> Result<()> {
        if !self.mount_point.starts_with('/') {
            exn::bail!(ErrorKind::Invalid {
                field: format!("mounts.{id}.mount_point"),
                reason: "must start with '/'".to_string(),
            });
        }
        match &self.backend {
            BackendConfig::Local { root } if !root.is_absolute() => {
                exn::bail!(ErrorKind::RelativePath(format!("mounts.{id}.backend.root")));
            },
            BackendConfig::S3 { bucket, .. } if bucket.is_empty() => {
                exn::bail!(ErrorKind::Invalid {
                    field: format!("mounts.{id}.backend.bucket"),
                    reason: "must not be empty".to_string(),
                });
            },
            _ => Ok(()),
        }
    }

    /// `/archive/` and `/archive` name the same mount point.
    fn normalized_mount_point(&self) -> String {
        let trimmed = self.mount_point.trim_end_matches('/');
        if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
    }

    /// Every backend setting as flat key/value pairs: the typed backend
    /// fields followed by the free-form `options`.
    pub fn backend_options(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        match &self.backend {
            BackendConfig::Local { root } => {
                out.insert("root".to_string(), Value::String(root.to_string_lossy().into_owned()));
            },
            BackendConfig::S3 { bucket, prefix, region, endpoint, key_id, key_secret } => {
                out.insert("bucket".to_string(), Value::String(bucket.clone()));
                out.insert("region".to_string(), Value::String(region.clone()));
                out.insert("key_id".to_string(), Value::String(key_id.clone()));
                out.insert("key_secret".to_string(), Value::String(key_secret.clone()));
                if let Some(prefix) = prefix {
                    out.insert("prefix".to_string(), Value::String(prefix.clone()));
                }
                if let Some(endpoint) = endpoint {
                    out.insert("endpoint".to_string(), Value::String(endpoint.clone()));
                }
            },
        }
        out.extend(self.options.iter().map(|(key, value)| (key.clone(), value.clone())));
        out
    }
}

fn default_auth() -> String {
    "none".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Local {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        key_id: String,
        key_secret: String,
    },
}
impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::S3 { .. } => "s3",
        }
    }

    pub fn local_root(&self) -> Option<&Path> {
        match self {
            Self::Local { root } => Some(root),
            Self::S3 { .. } => None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn local(mount_point: &str, root: &str) -> MountConfig {
        MountConfig {
            mount_point: mount_point.to_string(),
            backend: BackendConfig::Local { root: PathBuf::from(root) },
            auth: default_auth(),
            options: BTreeMap::new(),
            mount_options: BTreeMap::new(),
            applicable_users: Vec::new(),
            applicable_groups: Vec::new(),
        }
    }

    fn config_with(mounts: Vec<(&str, MountConfig)>) -> Config {
        Config {
            data_directory: PathBuf::from("/srv/data"),
            mounts: mounts.into_iter().map(|(id, mount)| (id.to_string(), mount)).collect(),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(config.scanner.locking);
        assert_eq!(config.scanner.reuse_flags().unwrap(), ReuseFlags::ALL);
        assert_eq!(config.scanner.blacklist, vec![".htaccess".to_string()]);
    }

    #[test]
    fn test_relative_data_directory() {
        let config = Config { data_directory: PathBuf::from("data"), ..Config::default() };
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::RelativePath(field) if field == "data_directory"));
    }

    #[test]
    fn test_relative_local_root() {
        let config = config_with(vec![("media", local("/media", "media"))]);
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::RelativePath(field) if field == "mounts.media.backend.root"));
    }

    #[rstest]
    #[case("/archive", "/archive")]
    #[case("/archive", "/archive/")]
    fn test_duplicate_mount_points(#[case] first: &str, #[case] second: &str) {
        let config = config_with(vec![("a", local(first, "/srv/a")), ("b", local(second, "/srv/b"))]);
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::DuplicateMountPoint(_)));
    }

    #[test]
    fn test_distinct_mount_points() {
        let config = config_with(vec![("a", local("/archive", "/srv/a")), ("b", local("/archive2", "/srv/b"))]);
        config.validate().unwrap();
    }

    #[rstest]
    #[case("archive")]
    #[case("")]
    fn test_mount_point_must_be_absolute(#[case] mount_point: &str) {
        let config = config_with(vec![("a", local(mount_point, "/srv/a"))]);
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid { field, .. } if field == "mounts.a.mount_point"));
    }

    #[test]
    fn test_unknown_reuse_flag() {
        let mut config = Config::default();
        config.scanner.reuse = "etag,colour".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid { field, .. } if field == "scanner.reuse"));
    }

    #[rstest]
    #[case("")]
    #[case("a/b")]
    #[case("..")]
    fn test_invalid_users(#[case] user: &str) {
        let config = Config { users: vec![user.to_string()], ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_options_merge_typed_and_free_form() {
        let mut mount = MountConfig {
            backend: BackendConfig::S3 {
                bucket: "photos".to_string(),
                prefix: None,
                region: default_region(),
                endpoint: Some("https://s3.example.com".to_string()),
                key_id: "id".to_string(),
                key_secret: "hunter2".to_string(),
            },
            ..local("/photos", "/unused")
        };
        mount.options.insert("storage_class".to_string(), Value::String("GLACIER".to_string()));
        let options = mount.backend_options();
        assert_eq!(options["bucket"], Value::String("photos".to_string()));
        assert_eq!(options["key_secret"], Value::String("hunter2".to_string()));
        assert_eq!(options["storage_class"], Value::String("GLACIER".to_string()));
        assert!(!options.contains_key("prefix"));
        assert_eq!(mount.backend.kind(), "s3");
    }

    #[test]
    fn test_home_root() {
        let config = config_with(vec![]);
        assert_eq!(config.home_root("alice"), PathBuf::from("/srv/data/alice"));
    }
}
