use crate::error::{ErrorKind, Result};
use crate::model::{Config, project_dirs};
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Prefix of environment variables overriding file settings.
pub const ENV_PREFIX: &str = "FILECACHE_";

/// Variables sharing the prefix that aren't configuration keys.
const IGNORED_ENV: &[&str] = &["log", "config"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Toml,
    Yaml,
    Json,
}
impl FileFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    fn provide(self, figment: Figment, path: &Path) -> Figment {
        match self {
            Self::Toml => figment.merge(Toml::file_exact(path)),
            Self::Yaml => figment.merge(Yaml::file_exact(path)),
            Self::Json => figment.merge(Json::file_exact(path)),
        }
    }
}

impl Config {
    /// Where the config file is looked for when none is given.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// The layered sources without extracting them. An explicit `file` must
    /// exist; the default location is skipped when absent.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        let file = match file {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::FileNotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.is_file()),
        };
        if let Some(path) = file {
            let format = FileFormat::from_path(&path).ok_or_raise(|| ErrorKind::UnsupportedFormat(path.clone()))?;
            debug!(path = %path.display(), ?format, "Reading config file");
            figment = format.provide(figment, &path);
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).ignore(IGNORED_ENV).split("__")))
    }

    /// Load and validate the configuration.
    #[instrument(level = "debug", skip_all)]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Config = Self::figment(file)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }
}
