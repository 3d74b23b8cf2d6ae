//! Configuration for filecache.
//!
//! Settings are layered with figment: built-in defaults, then a config file
//! (TOML, YAML or JSON), then `FILECACHE_*` environment variables where
//! `__` separates nesting levels (`FILECACHE_DATABASE__PATH`).

pub mod error;
mod load;
mod model;

pub use crate::load::{ENV_PREFIX, FileFormat};
pub use crate::model::{BackendConfig, Config, DatabaseConfig, MountConfig, ScannerConfig};
