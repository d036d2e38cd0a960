//! On-disk tile cache shared by cooperating processes.
//!
//! Tiles are fetched from the archive as `{tile}.zip`, and the `{tile}.tif`
//! member is extracted into the cache directory.
//!
//! ## Locking protocol
//!
//! Every tile has two advisory file locks in the cache directory:
//! - `{tile}.download.lock` serializes downloads of the tile
//! - `{tile}.write.lock` is held while the artifact is being written
//!
//! Locks are always taken download-then-write and released write-then-download.
//! A caller that finds the artifact already present only rendezvous on the
//! write lock, which guarantees it never observes a partially written file.
//! Artifacts are written to a temporary name and renamed into place, and once
//! present they are never modified.
//!
//! Tiles without coverage (ocean tiles have no archive) are recorded with a
//! `{tile}.unavailable` marker so later callers do not hit the network again.

use crate::config::CacheConfig;
use crate::crop::TileProvider;
use crate::fetch::{ArchiveFetcher, FetchOutcome, HttpFetcher};
use crate::grid::TileId;
use crate::lock::FileLock;
use crate::raster::OpenRaster;
use crate::tile::TileRaster;
use crate::{DemError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Materialization state of a tile after [`TileCache::ensure_tile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileStatus {
    /// The extracted raster is on disk at this path.
    Present(PathBuf),
    /// The archive has no data for this tile. Cached; never retried.
    Unavailable,
}

impl TileStatus {
    /// Path of the extracted raster, if present.
    pub fn path(&self) -> Option<&Path> {
        match self {
            TileStatus::Present(path) => Some(path),
            TileStatus::Unavailable => None,
        }
    }
}

/// Download statistics for the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Number of archives fetched by this instance.
    pub archives_fetched: usize,
    /// Total bytes downloaded by this instance.
    pub bytes_downloaded: u64,
    /// Number of tiles extracted by this instance.
    pub tiles_extracted: usize,
}

/// Disk-backed SRTM tile cache.
///
/// Safe to use from many threads and from many processes sharing the same
/// cache directory: at most one of them downloads and extracts a given tile.
/// Different tiles are fetched fully in parallel.
pub struct TileCache {
    config: CacheConfig,
    fetcher: Arc<dyn ArchiveFetcher>,
    archives_fetched: AtomicUsize,
    bytes_downloaded: AtomicU64,
    tiles_extracted: AtomicUsize,
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("cache_dir", &self.config.cache_dir)
            .field("archive_url", &self.config.archive_url)
            .finish()
    }
}

impl TileCache {
    /// Create a cache that downloads over HTTP.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Ok(Self::with_fetcher(config, fetcher))
    }

    /// Create a cache that obtains archives from `fetcher`.
    pub fn with_fetcher(config: CacheConfig, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        Self {
            config,
            fetcher,
            archives_fetched: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
            tiles_extracted: AtomicUsize::new(0),
        }
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cache root directory.
    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Path of the extracted raster for `id`.
    pub fn tile_path(&self, id: TileId) -> PathBuf {
        self.config.cache_dir.join(format!("{}.tif", id.name()))
    }

    /// Check whether the extracted raster for `id` is on disk.
    pub fn is_cached(&self, id: TileId) -> bool {
        self.tile_path(id).exists()
    }

    /// Get download statistics for this instance.
    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            archives_fetched: self.archives_fetched.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            tiles_extracted: self.tiles_extracted.load(Ordering::Relaxed),
        }
    }

    /// Make sure the raster for `id` is on disk, downloading and extracting it
    /// at most once across all cooperating callers.
    ///
    /// Network failures are returned as [`DemError::Network`] and leave no
    /// trace besides a stale archive that the next attempt overwrites.
    pub fn ensure_tile(&self, id: TileId) -> Result<TileStatus> {
        let name = id.name();
        let cache_dir = &self.config.cache_dir;
        fs::create_dir_all(cache_dir)?;

        let tile_path = self.tile_path(id);
        let marker_path = cache_dir.join(format!("{}.unavailable", name));
        let archive_path = cache_dir.join(format!("{}.zip", name));
        let download_lock = FileLock::new(cache_dir.join(format!("{}.download.lock", name)));
        let write_lock = FileLock::new(cache_dir.join(format!("{}.write.lock", name)));

        if let Some(status) = settled_status(&tile_path, &marker_path) {
            // The artifact may still be being written; wait for the writer.
            write_lock.rendezvous()?;
            debug!(tile = %name, ?status, "cache hit");
            return Ok(status);
        }

        let download_guard = download_lock.acquire()?;

        // Another holder may have finished while we waited for the lock.
        if let Some(status) = settled_status(&tile_path, &marker_path) {
            debug!(tile = %name, ?status, "materialized by another caller");
            return Ok(status);
        }

        if archive_path.exists() {
            warn!(tile = %name, path = %archive_path.display(), "overwriting stale partial archive");
        }

        let url = self.config.archive_url_for(&name);
        let outcome = self.fetcher.fetch(&name, &url, &archive_path)?;
        if let FetchOutcome::Downloaded { bytes } = outcome {
            self.archives_fetched.fetch_add(1, Ordering::Relaxed);
            self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
        }

        let write_guard = write_lock.acquire()?;

        let extracted = match outcome {
            FetchOutcome::Downloaded { .. } => extract_member(&archive_path, &name, &tile_path),
            FetchOutcome::NotFound => Ok(false),
        };

        let status = match extracted {
            Ok(true) => {
                self.tiles_extracted.fetch_add(1, Ordering::Relaxed);
                info!(tile = %name, path = %tile_path.display(), "tile extracted");
                Ok(TileStatus::Present(tile_path))
            }
            Ok(false) => {
                info!(tile = %name, "tile not available");
                fs::write(&marker_path, b"").map(|_| TileStatus::Unavailable).map_err(DemError::from)
            }
            Err(e) => Err(e),
        };

        remove_if_exists(&archive_path)?;

        drop(write_guard);
        drop(download_guard);

        status
    }
}

impl TileProvider for TileCache {
    fn open(&self, id: TileId) -> Result<Option<Box<dyn OpenRaster>>> {
        match self.ensure_tile(id)? {
            TileStatus::Present(path) => Ok(Some(Box::new(TileRaster::open(path)?))),
            TileStatus::Unavailable => Ok(None),
        }
    }
}

/// Present or unavailable, if either has been recorded.
fn settled_status(tile_path: &Path, marker_path: &Path) -> Option<TileStatus> {
    if tile_path.exists() {
        Some(TileStatus::Present(tile_path.to_path_buf()))
    } else if marker_path.exists() {
        Some(TileStatus::Unavailable)
    } else {
        None
    }
}

/// Extract `{name}.tif` from the archive to `dest`.
///
/// Returns `Ok(false)` if the file is not a zip archive or lacks the member.
fn extract_member(archive_path: &Path, name: &str, dest: &Path) -> Result<bool> {
    let file = fs::File::open(archive_path)?;
    let mut archive = match zip::ZipArchive::new(file) {
        Ok(archive) => archive,
        Err(zip::result::ZipError::InvalidArchive(_))
        | Err(zip::result::ZipError::UnsupportedArchive(_)) => {
            debug!(tile = %name, "archive is not a valid zip file");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    let member_name = format!("{}.tif", name);
    let mut member = match archive.by_name(&member_name) {
        Ok(member) => member,
        Err(zip::result::ZipError::FileNotFound) => {
            debug!(tile = %name, member = %member_name, "archive has no tile raster");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    let partial = dest.with_extension("tif.part");
    {
        let mut out = io::BufWriter::new(fs::File::create(&partial)?);
        io::copy(&mut member, &mut out)?;
        io::Write::flush(&mut out)?;
    }
    fs::rename(&partial, dest)?;
    Ok(true)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    /// Serves zip archives from memory and counts fetches.
    struct FakeFetcher {
        archives: Mutex<std::collections::HashMap<String, Vec<u8>>>,
        fetches: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl FakeFetcher {
        fn new() -> Self {
            Self {
                archives: Mutex::new(std::collections::HashMap::new()),
                fetches: AtomicUsize::new(0),
                delay: Duration::from_millis(0),
                fail: false,
            }
        }

        fn serve(self, tile: &str, bytes: Vec<u8>) -> Self {
            self.archives.lock().unwrap().insert(tile.to_string(), bytes);
            self
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl ArchiveFetcher for FakeFetcher {
        fn fetch(&self, tile: &str, url: &str, dest: &Path) -> Result<FetchOutcome> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            if self.fail {
                return Err(DemError::Network {
                    tile: tile.to_string(),
                    url: url.to_string(),
                    reason: "HTTP 503 Service Unavailable".to_string(),
                });
            }
            match self.archives.lock().unwrap().get(tile) {
                Some(bytes) => {
                    fs::write(dest, bytes)?;
                    Ok(FetchOutcome::Downloaded {
                        bytes: bytes.len() as u64,
                    })
                }
                None => Ok(FetchOutcome::NotFound),
            }
        }
    }

    fn zip_with(member: &str, contents: &[u8]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
        writer
            .start_file(member, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn cache_with(fetcher: Arc<FakeFetcher>) -> (tempfile::TempDir, TileCache) {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::with_cache_dir(dir.path().join("cache"));
        (dir, TileCache::with_fetcher(config, fetcher))
    }

    #[test]
    fn test_download_and_extract() {
        let fetcher = Arc::new(FakeFetcher::new().serve("srtm_37_04", zip_with("srtm_37_04.tif", b"tile data")));
        let (_dir, cache) = cache_with(fetcher.clone());
        let id = TileId::new(37, 4);

        let status = cache.ensure_tile(id).unwrap();
        assert_eq!(status, TileStatus::Present(cache.tile_path(id)));
        assert_eq!(fs::read(cache.tile_path(id)).unwrap(), b"tile data");
        // Temporary archive is removed
        assert!(!cache.cache_dir().join("srtm_37_04.zip").exists());

        // Second call is served from disk
        cache.ensure_tile(id).unwrap();
        assert_eq!(fetcher.fetches(), 1);
        let stats = cache.download_stats();
        assert_eq!(stats.archives_fetched, 1);
        assert_eq!(stats.tiles_extracted, 1);
    }

    #[test]
    fn test_missing_archive_is_cached_as_unavailable() {
        let fetcher = Arc::new(FakeFetcher::new());
        let (_dir, cache) = cache_with(fetcher.clone());
        let id = TileId::new(14, 9);

        assert_eq!(cache.ensure_tile(id).unwrap(), TileStatus::Unavailable);
        assert_eq!(cache.ensure_tile(id).unwrap(), TileStatus::Unavailable);
        assert_eq!(fetcher.fetches(), 1);
        assert!(!cache.is_cached(id));
    }

    #[test]
    fn test_invalid_archive_is_unavailable() {
        let fetcher = Arc::new(
            FakeFetcher::new()
                .serve("srtm_01_01", b"<html>not found</html>".to_vec())
                .serve("srtm_01_02", zip_with("readme.txt", b"nothing here")),
        );
        let (_dir, cache) = cache_with(fetcher.clone());

        assert_eq!(cache.ensure_tile(TileId::new(1, 1)).unwrap(), TileStatus::Unavailable);
        assert_eq!(cache.ensure_tile(TileId::new(1, 2)).unwrap(), TileStatus::Unavailable);
        assert!(!cache.cache_dir().join("srtm_01_01.zip").exists());
        assert!(!cache.cache_dir().join("srtm_01_02.zip").exists());
    }

    #[test]
    fn test_network_error_propagates_and_releases_locks() {
        let mut failing = FakeFetcher::new();
        failing.fail = true;
        let fetcher = Arc::new(failing);
        let (_dir, cache) = cache_with(fetcher.clone());
        let id = TileId::new(37, 4);

        let err = cache.ensure_tile(id).unwrap_err();
        assert!(matches!(err, DemError::Network { .. }));
        assert!(!cache.is_cached(id));

        // Locks were released: a second attempt reaches the fetcher again
        // instead of blocking, and is not short-circuited.
        assert!(cache.ensure_tile(id).is_err());
        assert_eq!(fetcher.fetches(), 2);
    }

    #[test]
    fn test_stale_partial_archive_is_overwritten() {
        let fetcher = Arc::new(FakeFetcher::new().serve("srtm_37_04", zip_with("srtm_37_04.tif", b"fresh")));
        let (_dir, cache) = cache_with(fetcher);
        let id = TileId::new(37, 4);

        fs::create_dir_all(cache.cache_dir()).unwrap();
        fs::write(cache.cache_dir().join("srtm_37_04.zip"), b"truncated garbage").unwrap();

        assert!(matches!(cache.ensure_tile(id).unwrap(), TileStatus::Present(_)));
        assert_eq!(fs::read(cache.tile_path(id)).unwrap(), b"fresh");
    }

    #[test]
    fn test_concurrent_callers_fetch_once() {
        let payload = vec![7u8; 256 * 1024];
        let mut fake = FakeFetcher::new().serve("srtm_41_03", zip_with("srtm_41_03.tif", &payload));
        fake.delay = Duration::from_millis(200);
        let fetcher = Arc::new(fake);
        let dir = tempfile::tempdir().unwrap();
        let id = TileId::new(41, 3);

        // Independent cache instances model independent processes sharing the
        // directory: no in-memory state is shared between them.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let fetcher = fetcher.clone();
                let config = CacheConfig::with_cache_dir(dir.path());
                let payload = payload.clone();
                thread::spawn(move || {
                    let cache = TileCache::with_fetcher(config, fetcher);
                    let status = cache.ensure_tile(id).unwrap();
                    let path = status.path().unwrap().to_path_buf();
                    assert_eq!(fs::read(path).unwrap(), payload);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(fetcher.fetches(), 1);
    }

    #[test]
    fn test_distinct_tiles_do_not_serialize() {
        let mut fake = FakeFetcher::new()
            .serve("srtm_37_03", zip_with("srtm_37_03.tif", b"a"))
            .serve("srtm_38_03", zip_with("srtm_38_03.tif", b"b"));
        fake.delay = Duration::from_millis(300);
        let fetcher = Arc::new(fake);
        let (_dir, cache) = cache_with(fetcher.clone());
        let cache = Arc::new(cache);

        let start = std::time::Instant::now();
        let handles: Vec<_> = [TileId::new(37, 3), TileId::new(38, 3)]
            .into_iter()
            .map(|id| {
                let cache = cache.clone();
                thread::spawn(move || cache.ensure_tile(id).unwrap())
            })
            .collect();
        for handle in handles {
            assert!(matches!(handle.join().unwrap(), TileStatus::Present(_)));
        }

        assert_eq!(fetcher.fetches(), 2);
        assert!(start.elapsed() < Duration::from_millis(550));
    }
}
