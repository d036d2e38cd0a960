//! Crop assembly: latitude clipping, antimeridian splitting, tile merging and
//! optional conversion to ellipsoidal heights.

use crate::align::{align, intersect_interval, GeoBounds, PixelTransform, RES};
use crate::datum::DatumTransformer;
use crate::grid::{TileId, MAX_LAT, MIN_LAT};
use crate::raster::{merge, OpenRaster, Raster};
use crate::{DemError, Result};
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// EPSG code of the horizontal reference of every crop (WGS 84).
pub const CROP_EPSG: u32 = 4326;

/// Source of open tile rasters.
pub trait TileProvider: Send + Sync {
    /// Open the tile, or `None` if the archive has no data for it.
    fn open(&self, id: TileId) -> Result<Option<Box<dyn OpenRaster>>>;
}

/// Vertical reference of returned heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Datum {
    /// Heights above the EGM96 geoid, as stored in the tiles.
    #[default]
    Orthometric,
    /// Heights above the WGS 84 ellipsoid.
    Ellipsoidal,
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Orthometric => write!(f, "orthometric"),
            Datum::Ellipsoidal => write!(f, "ellipsoidal"),
        }
    }
}

impl FromStr for Datum {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "orthometric" => Ok(Datum::Orthometric),
            "ellipsoidal" => Ok(Datum::Ellipsoidal),
            other => Err(format!(
                "unknown datum '{}', expected 'orthometric' or 'ellipsoidal'",
                other
            )),
        }
    }
}

/// An assembled crop.
#[derive(Debug, Clone)]
pub struct Crop {
    /// Heights in meters; NaN where no tile has data.
    pub raster: Raster,
    /// Pixel-is-area transform of the raster.
    pub transform: PixelTransform,
    /// Horizontal CRS, always [`CROP_EPSG`] whatever the datum.
    pub epsg: u32,
}

/// Result of a crop request.
#[derive(Debug, Clone)]
pub enum CropOutcome {
    Crop(Crop),
    /// The request lies outside the ±60° band or no tile it touches has data.
    NoCoverage,
}

impl CropOutcome {
    /// The crop, if there is one.
    pub fn into_crop(self) -> Option<Crop> {
        match self {
            CropOutcome::Crop(crop) => Some(crop),
            CropOutcome::NoCoverage => None,
        }
    }
}

/// One continuous (non seam-crossing) part of a crop.
struct Segment {
    raster: Raster,
    transform: PixelTransform,
    /// At least one tile contributed data.
    covered: bool,
}

/// Wrap a longitude into `[-180, 180)`. Longitudes already in range are
/// returned bit-for-bit.
pub fn wrap_lon(lon: f64) -> f64 {
    if (-180.0..180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Assembles crops from the tiles of a [`TileProvider`].
pub struct Cropper {
    provider: Arc<dyn TileProvider>,
    transformer: Option<Arc<dyn DatumTransformer>>,
}

impl fmt::Debug for Cropper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cropper")
            .field("has_transformer", &self.transformer.is_some())
            .finish()
    }
}

impl Cropper {
    /// Create a cropper for orthometric heights.
    pub fn new(provider: Arc<dyn TileProvider>) -> Self {
        Self {
            provider,
            transformer: None,
        }
    }

    /// Enable [`Datum::Ellipsoidal`] crops using `transformer`.
    pub fn with_transformer(mut self, transformer: Arc<dyn DatumTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Crop `bounds` (`lon_start, lat_min, lon_end, lat_max`).
    ///
    /// Longitudes may lie outside `[-180, 180)`; a request whose wrapped
    /// longitudes cross the antimeridian is assembled from a western part
    /// ending just before 180°E and an eastern part starting at 180°W, and the
    /// returned transform is that of the western part.
    pub fn crop(&self, bounds: &GeoBounds, datum: Datum) -> Result<CropOutcome> {
        if !(bounds.lon_min <= bounds.lon_max) {
            return Err(DemError::precondition(format!(
                "longitude interval [{}, {}] is not valid",
                bounds.lon_min, bounds.lon_max
            )));
        }
        if !(bounds.lat_max > bounds.lat_min) {
            return Err(DemError::precondition(format!(
                "latitude interval [{}, {}] is empty",
                bounds.lat_min, bounds.lat_max
            )));
        }
        if datum == Datum::Ellipsoidal && self.transformer.is_none() {
            return Err(DemError::MissingDatumTransformer);
        }

        let offset = 0.1 * RES;
        let east_limit = 180.0 - RES - offset;
        let (lat_min, lat_max) = (bounds.lat_min, bounds.lat_max);

        if bounds.lon_max - bounds.lon_min >= 360.0 {
            debug!("request spans the whole globe");
            let whole = GeoBounds::new(-180.0, lat_min, east_limit, lat_max);
            return finish(self.crop_continuous(&whole, datum)?.into_iter().collect());
        }

        let lon_start = wrap_lon(bounds.lon_min);
        let lon_end = wrap_lon(bounds.lon_max);

        if lon_end < lon_start {
            debug!(lon_start, lon_end, "request crosses the antimeridian");
            let west = GeoBounds::new(lon_start, lat_min, east_limit, lat_max);
            let east = GeoBounds::new(-180.0 + offset, lat_min, lon_end, lat_max);
            let segments = [west, east]
                .iter()
                .map(|part| self.crop_continuous(part, datum))
                .collect::<Result<Vec<_>>>()?;
            finish(segments.into_iter().flatten().collect())
        } else {
            let continuous = GeoBounds::new(lon_start, lat_min, lon_end, lat_max);
            finish(self.crop_continuous(&continuous, datum)?.into_iter().collect())
        }
    }

    /// Crop bounds that do not cross the antimeridian. `None` if the bounds
    /// lie outside the covered latitude band.
    fn crop_continuous(&self, bounds: &GeoBounds, datum: Datum) -> Result<Option<Segment>> {
        let Some((lat_min, lat_max)) =
            intersect_interval((bounds.lat_min, bounds.lat_max), (MIN_LAT, MAX_LAT))
        else {
            info!(lat_min = bounds.lat_min, lat_max = bounds.lat_max, "latitudes outside coverage");
            return Ok(None);
        };

        let grid = align(&GeoBounds::new(bounds.lon_min, lat_min, bounds.lon_max, lat_max));
        let ids = TileId::covering(&grid.bounds);
        debug!(
            tiles = ids.len(),
            height = grid.shape.0,
            width = grid.shape.1,
            "assembling segment"
        );

        let opened = ids
            .par_iter()
            .map(|id| self.provider.open(*id))
            .collect::<Result<Vec<_>>>()?;
        let tiles: Vec<&dyn OpenRaster> = opened.iter().flatten().map(|t| t.as_ref()).collect();

        let mut raster = merge(&tiles, &grid.transform, grid.shape, f32::NAN)?;
        let covered = raster.count_valid() > 0;

        if covered && datum == Datum::Ellipsoidal {
            let transformer = self
                .transformer
                .as_deref()
                .ok_or(DemError::MissingDatumTransformer)?;
            to_ellipsoid(&mut raster, &grid.transform, transformer)?;
        }

        Ok(Some(Segment {
            raster,
            transform: grid.transform,
            covered,
        }))
    }
}

/// Join segments west to east, or report that nothing was covered.
///
/// Segments of different heights are a [`DemError::Precondition`].
fn finish(segments: Vec<Segment>) -> Result<CropOutcome> {
    if !segments.iter().any(|s| s.covered) {
        return Ok(CropOutcome::NoCoverage);
    }
    let mut parts = segments.into_iter();
    let Some(first) = parts.next() else {
        return Ok(CropOutcome::NoCoverage);
    };
    let transform = first.transform;
    let mut raster = first.raster;
    for part in parts {
        raster = Raster::hstack(&raster, &part.raster)?;
    }
    Ok(CropOutcome::Crop(Crop {
        raster,
        transform,
        epsg: CROP_EPSG,
    }))
}

/// Convert every valid pixel to ellipsoidal height, in place.
///
/// The geographic position of each pixel is the centre given by the
/// pixel-is-area `transform`. Results are rounded to 5 decimals. If no valid
/// value changes the conversion is assumed to have silently failed.
fn to_ellipsoid(
    raster: &mut Raster,
    transform: &PixelTransform,
    transformer: &dyn DatumTransformer,
) -> Result<()> {
    let width = raster.width();
    let nodata = raster.nodata();

    let changed = raster
        .data_mut()
        .par_chunks_mut(width)
        .enumerate()
        .map(|(row, values)| {
            let mut changed = false;
            for (col, value) in values.iter_mut().enumerate() {
                if crate::raster::is_nodata(*value, nodata) {
                    continue;
                }
                let (lon, lat) = transform.apply(col as f64 + 0.5, row as f64 + 0.5);
                let height = transformer.to_ellipsoid(lon, lat, f64::from(*value));
                let rounded = ((height * 1e5).round() / 1e5) as f32;
                changed |= rounded != *value;
                *value = rounded;
            }
            changed
        })
        .reduce(|| false, |a, b| a || b);

    if !changed {
        return Err(DemError::precondition(
            "datum conversion left every height unchanged",
        ));
    }
    Ok(())
}
