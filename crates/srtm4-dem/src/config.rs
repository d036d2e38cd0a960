//! Cache configuration.

use crate::{DemError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache directory.
pub const CACHE_DIR_ENV: &str = "SRTM4_CACHE";

/// Environment variable overriding the archive base URL.
pub const ARCHIVE_URL_ENV: &str = "SRTM4_URL";

/// Environment variable naming a `.gtx` geoid grid for ellipsoidal heights.
pub const GEOID_ENV: &str = "SRTM4_GEOID";

/// CGIAR-CSI SRTM 90m v4.1 archive of 5x5 degree GeoTIFF tiles.
pub const DEFAULT_ARCHIVE_URL: &str =
    "https://srtm.csi.cgiar.org/wp-content/uploads/files/srtm_5x5/TIFF";

/// Default number of retries on 5xx responses and connection failures.
pub const DEFAULT_RETRIES: u32 = 5;

/// Default backoff factor in seconds.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 0.3;

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Where tiles are cached and how they are fetched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root holding extracted tiles and lock files.
    pub cache_dir: PathBuf,
    /// Base URL; archives are fetched from `{archive_url}/{tile}.zip`.
    pub archive_url: String,
    /// Retries on 5xx responses and connection failures.
    pub retries: u32,
    /// Backoff factor in seconds; retry `n` waits `backoff_factor * 2^n`.
    pub backoff_factor: f64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::with_cache_dir(default_cache_dir())
    }
}

impl CacheConfig {
    /// Default settings with an explicit cache directory.
    pub fn with_cache_dir<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            retries: DEFAULT_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Default settings with `SRTM4_CACHE` and `SRTM4_URL` overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load settings from a YAML file, then apply environment overrides.
    ///
    /// Missing fields take their defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yaml::from_str(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.archive_url.is_empty() {
            return Err(DemError::Config("archive_url is empty".to_string()));
        }
        if !(self.backoff_factor >= 0.0) {
            return Err(DemError::Config(format!(
                "backoff_factor must be non-negative, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// URL of the archive for the named tile.
    pub fn archive_url_for(&self, tile_name: &str) -> String {
        format!("{}/{}.zip", self.archive_url.trim_end_matches('/'), tile_name)
    }

    fn apply_env(&mut self) {
        if let Some(dir) = non_empty_env(CACHE_DIR_ENV) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(url) = non_empty_env(ARCHIVE_URL_ENV) {
            self.archive_url = url;
        }
    }
}

/// `~/.srtm`, or `./.srtm` when no home directory is known.
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".srtm")
}

/// Geoid grid path from `SRTM4_GEOID`, if set.
pub fn geoid_path_from_env() -> Option<PathBuf> {
    non_empty_env(GEOID_ENV).map(PathBuf::from)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
