//! Remote archive fetching with retry and exponential backoff.

use crate::config::CacheConfig;
use crate::{DemError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Outcome of fetching one tile archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The archive was written to the destination path.
    Downloaded {
        /// Bytes written.
        bytes: u64,
    },
    /// The server has no archive for this tile (HTTP 404).
    NotFound,
}

/// Source of tile archives.
///
/// The production implementation is [`HttpFetcher`]; tests inject fakes to
/// observe how often the network is hit.
pub trait ArchiveFetcher: Send + Sync {
    /// Fetch the archive at `url` into `dest`, overwriting any existing file.
    ///
    /// `tile` is the canonical tile name, used for error reporting.
    fn fetch(&self, tile: &str, url: &str, dest: &Path) -> Result<FetchOutcome>;
}

/// Blocking HTTP fetcher.
///
/// Retries connection failures and 5xx responses up to `retries` times,
/// sleeping `backoff_factor * 2^n` seconds before retry `n`.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    retries: u32,
    backoff_factor: f64,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("retries", &self.retries)
            .field("backoff_factor", &self.backoff_factor)
            .finish()
    }
}

impl HttpFetcher {
    /// Create a fetcher using the retry policy and timeout from `config`.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            retries: config.retries,
            backoff_factor: config.backoff_factor,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.backoff_factor * f64::from(1u32 << attempt.min(16)))
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, tile: &str, url: &str, dest: &Path) -> Result<FetchOutcome> {
        let network_error = |reason: String| DemError::Network {
            tile: tile.to_string(),
            url: url.to_string(),
            reason,
        };

        let mut attempt = 0;
        let mut response = loop {
            match self.client.get(url).send() {
                Ok(response) if response.status().is_server_error() && attempt < self.retries => {
                    warn!(tile, status = %response.status(), attempt, "server error, retrying");
                }
                Ok(response) => break response,
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.retries => {
                    warn!(tile, error = %e, attempt, "request failed, retrying");
                }
                Err(e) => {
                    return Err(network_error(format!(
                        "{} (after {} attempts)",
                        e,
                        attempt + 1
                    )))
                }
            }
            std::thread::sleep(self.backoff(attempt));
            attempt += 1;
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(FetchOutcome::NotFound);
        }
        if !(status.is_success() || status.is_redirection()) {
            return Err(network_error(format!(
                "HTTP {} (after {} attempts)",
                status,
                attempt + 1
            )));
        }
        let size = response
            .content_length()
            .ok_or_else(|| network_error("response has no Content-Length".to_string()))?;

        info!(tile, bytes = size, dest = %dest.display(), "downloading");

        let mut writer = BufWriter::new(File::create(dest)?);
        let bytes = response
            .copy_to(&mut writer)
            .map_err(|e| network_error(format!("transfer interrupted: {}", e)))?;
        writer.flush()?;

        Ok(FetchOutcome::Downloaded { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let config = CacheConfig {
            backoff_factor: 0.3,
            ..CacheConfig::with_cache_dir("/tmp/unused")
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        assert_eq!(fetcher.backoff(0), Duration::from_secs_f64(0.3));
        assert_eq!(fetcher.backoff(1), Duration::from_secs_f64(0.6));
        assert_eq!(fetcher.backoff(2), Duration::from_secs_f64(1.2));
    }

    #[test]
    fn test_connection_refused_is_network_error() {
        let config = CacheConfig {
            retries: 1,
            backoff_factor: 0.0,
            timeout_secs: 2,
            ..CacheConfig::with_cache_dir("/tmp/unused")
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let dir = tempfile::tempdir().unwrap();

        // Port 9 (discard) on localhost is not expected to accept HTTP
        let err = fetcher
            .fetch("srtm_37_04", "http://127.0.0.1:9/srtm_37_04.zip", &dir.path().join("a.zip"))
            .unwrap_err();
        assert!(matches!(err, DemError::Network { .. }));
    }
}
