//! # srtm4-dem
//!
//! SRTM 90m elevation tiles: an on-disk tile cache and crop assembly.
//!
//! This crate provides:
//! - A tile cache that downloads CGIAR-CSI SRTM v4.1 5x5 degree tiles on
//!   demand and extracts them at most once, even with many processes sharing
//!   one cache directory
//! - Crop assembly over arbitrary bounds, including bounds that cross the
//!   antimeridian, with orthometric or ellipsoidal heights
//! - Point elevation lookup with bilinear interpolation
//! - GeoTIFF output for crops
//!
//! ## Overview
//!
//! ### Tiles
//!
//! The archive covers latitudes 60°S to 60°N with 72 x 24 tiles named
//! `srtm_LL_LL` (e.g. `srtm_37_04`). Each tile holds 6000 x 6000 samples
//! spaced 3 arc-seconds apart, heights in meters above the EGM96 geoid.
//!
//! Tiles are fetched from `{archive_url}/{tile}.zip` and cached as
//! `{tile}.tif` under `~/.srtm` (override with `SRTM4_CACHE`). Ocean tiles
//! have no archive; they are remembered as unavailable and read as NaN.
//!
//! ### Crops
//!
//! Requested bounds are snapped outward onto the 3 arc-second grid, so both
//! boundary samples are included. The returned transform is pixel-is-area
//! and the CRS is always EPSG:4326.
//!
//! ## Examples
//!
//! ### Cropping
//!
//! ```no_run
//! use srtm4_dem::{CacheConfig, Cropper, Datum, GeoBounds, TileCache};
//! use std::sync::Arc;
//!
//! let cache = TileCache::new(CacheConfig::from_env())?;
//! let cropper = Cropper::new(Arc::new(cache));
//!
//! // Crosses the antimeridian
//! let bounds = GeoBounds::new(179.0, -20.0, 181.0, -19.0);
//! if let Some(crop) = cropper.crop(&bounds, Datum::Orthometric)?.into_crop() {
//!     println!("{:?}", crop.raster.shape()); // (1201, 2401)
//!     srtm4_dem::write_geotiff(&crop, "fiji.tif")?;
//! }
//! # Ok::<(), srtm4_dem::DemError>(())
//! ```
//!
//! ### Point lookup with ellipsoidal heights
//!
//! ```no_run
//! use srtm4_dem::{CacheConfig, Datum, GeoidGrid, PointSolver, TileCache};
//! use std::sync::Arc;
//!
//! let cache = Arc::new(TileCache::new(CacheConfig::from_env())?);
//! let geoid = Arc::new(GeoidGrid::open("egm96_15.gtx")?);
//! let solver = PointSolver::new(cache).with_transformer(geoid);
//!
//! let height = solver.elevation(2.0, 48.0, Datum::Ellipsoidal)?;
//! println!("Height above the ellipsoid: {} meters", height);
//! # Ok::<(), srtm4_dem::DemError>(())
//! ```

mod align;
mod cache;
mod config;
mod crop;
mod datum;
mod error;
mod fetch;
mod grid;
mod lock;
mod point;
mod raster;
mod tile;
mod writer;

pub use align::{align, pixel_window, AlignedGrid, GeoBounds, PixelTransform, PixelWindow, RES, WINDOW_TOLERANCE};
pub use cache::{DownloadStats, TileCache, TileStatus};
pub use config::{
    default_cache_dir, geoid_path_from_env, CacheConfig, ARCHIVE_URL_ENV, CACHE_DIR_ENV,
    DEFAULT_ARCHIVE_URL, GEOID_ENV,
};
pub use crop::{wrap_lon, Crop, CropOutcome, Cropper, Datum, TileProvider, CROP_EPSG};
pub use datum::{DatumTransformer, GeoidGrid};
pub use error::DemError;
pub use fetch::{ArchiveFetcher, FetchOutcome, HttpFetcher};
pub use grid::{locate, TileId, LAT_TILES, LON_TILES, MAX_LAT, MIN_LAT, TILE_SIZE_DEG};
pub use lock::{FileLock, FileLockGuard};
pub use point::{Elevations, PointSolver, Points};
pub use raster::{is_nodata, merge, MemoryRaster, OpenRaster, Raster};
pub use tile::{TileRaster, SRTM_NODATA};
pub use writer::{write_geotiff, write_geotiff_to};

/// Result type for DEM operations.
pub type Result<T> = std::result::Result<T, DemError>;
