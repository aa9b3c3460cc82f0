//! Cache configuration.
//!
//! Settings are layered with figment, lowest priority first:
//!
//! 1. Built-in defaults ([`CacheConfig::default`])
//! 2. TOML config file (`--config`, or `config.toml` in the platform config dir)
//! 3. `THUMBCACHE_*` environment variables (e.g. `THUMBCACHE_MEMORY_CACHE_SIZE=512`)
//! 4. CLI flags, applied by the caller after loading
//!
//! ```toml
//! db_path = "/var/cache/viewer"
//! max_entries = 20000
//! retention_period = 2592000  # seconds
//! compression_level = 3
//! ```

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::codec::MAX_COMPRESSION_LEVEL;
use crate::cache::database::DEFAULT_DB_FILENAME;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "THUMBCACHE_";

/// Configuration for [`crate::cache::CacheManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Database file, or a directory to hold `thumbcache.db`.
    pub db_path: PathBuf,
    /// Soft cap on the summed payload size on disk.
    pub max_size_bytes: u64,
    /// Soft cap on the number of entries on disk.
    pub max_entries: u64,
    /// Entries older than this are expired. `None` (or 0 seconds in a
    /// config file) keeps them forever.
    #[serde(with = "optional_secs")]
    pub retention_period: Option<Duration>,
    /// zstd level for payloads; 0 stores them raw.
    pub compression_level: i32,
    /// Number of thumbnails held in memory.
    pub memory_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_size_bytes: 1024 * 1024 * 1024,
            max_entries: 50_000,
            retention_period: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            compression_level: 0,
            memory_cache_size: 256,
        }
    }
}

impl CacheConfig {
    /// Defaults with the store at `db_path`.
    #[must_use]
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Load layered configuration.
    ///
    /// An explicit `config_file` must exist; the default one is optional.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match config_file {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(path) = default_config_path() {
                    if path.exists() {
                        log::debug!("Loading config from {}", path.display());
                        figment = figment.merge(Toml::file(path));
                    }
                }
            }
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.memory_cache_size == 0 {
            anyhow::bail!("memory_cache_size must be at least 1");
        }
        if !(0..=MAX_COMPRESSION_LEVEL).contains(&self.compression_level) {
            anyhow::bail!(
                "compression_level must be between 0 and {}, got {}",
                MAX_COMPRESSION_LEVEL,
                self.compression_level
            );
        }
        if self.db_path.as_os_str().is_empty() {
            anyhow::bail!("db_path must not be empty");
        }
        Ok(())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "thumbcache", "thumbcache")
}

/// Platform cache directory joined with the default database name.
#[must_use]
pub fn default_db_path() -> PathBuf {
    match project_dirs() {
        Some(dirs) => dirs.cache_dir().join(DEFAULT_DB_FILENAME),
        None => PathBuf::from(DEFAULT_DB_FILENAME),
    }
}

/// Platform config directory joined with `config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs))
    }
}
