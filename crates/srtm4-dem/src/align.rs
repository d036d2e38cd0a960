//! Geographic bounds, affine pixel transforms and pixel-grid alignment.
//!
//! SRTM 90m samples sit on a fixed 3 arc-second lattice. Crop requests are
//! snapped outward onto that lattice so every output pixel coincides with a
//! tile sample.

use crate::{DemError, Result};

/// Sample spacing in degrees (3 arc-seconds).
pub const RES: f64 = 3.0 / 3600.0;

/// Maximum rounding error, in pixels, tolerated when converting bounds to a
/// pixel window.
pub const WINDOW_TOLERANCE: f64 = 1e-2;

/// Geographic bounds in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    /// West edge.
    pub lon_min: f64,
    /// South edge.
    pub lat_min: f64,
    /// East edge.
    pub lon_max: f64,
    /// North edge.
    pub lat_max: f64,
}

impl GeoBounds {
    /// Create bounds from `(lon_min, lat_min, lon_max, lat_max)`.
    pub fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        }
    }

    /// Check that both axes are proper intervals (`max > min`).
    pub fn validate(&self) -> Result<()> {
        if !(self.lon_max > self.lon_min) {
            return Err(DemError::precondition(format!(
                "longitude interval [{}, {}] is empty",
                self.lon_min, self.lon_max
            )));
        }
        if !(self.lat_max > self.lat_min) {
            return Err(DemError::precondition(format!(
                "latitude interval [{}, {}] is empty",
                self.lat_min, self.lat_max
            )));
        }
        Ok(())
    }

    /// Intersection of two bounds, or `None` if they are disjoint.
    ///
    /// Bounds that only touch along an edge yield a zero-width intersection.
    pub fn intersection(&self, other: &GeoBounds) -> Option<GeoBounds> {
        let (lon_min, lon_max) = intersect_interval(
            (self.lon_min, self.lon_max),
            (other.lon_min, other.lon_max),
        )?;
        let (lat_min, lat_max) = intersect_interval(
            (self.lat_min, self.lat_max),
            (other.lat_min, other.lat_max),
        )?;
        Some(GeoBounds::new(lon_min, lat_min, lon_max, lat_max))
    }
}

/// Intersection of two closed intervals, or `None` when disjoint.
pub fn intersect_interval(a: (f64, f64), b: (f64, f64)) -> Option<(f64, f64)> {
    let low = a.0.max(b.0);
    let high = a.1.min(b.1);
    if low > high {
        None
    } else {
        Some((low, high))
    }
}

/// North-up affine transform from pixel `(col, row)` to `(lon, lat)`.
///
/// `lon = origin_lon + col * pixel_width`, `lat = origin_lat + row * pixel_height`
/// with `pixel_height` negative. Whether the origin is the corner or the
/// centre of pixel (0, 0) is a property of the producer; see
/// [`pixel_window`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelTransform {
    /// Longitude of the origin.
    pub origin_lon: f64,
    /// Latitude of the origin.
    pub origin_lat: f64,
    /// Degrees per column (positive).
    pub pixel_width: f64,
    /// Degrees per row (negative for north-up rasters).
    pub pixel_height: f64,
}

impl PixelTransform {
    /// Create a transform.
    pub fn new(origin_lon: f64, origin_lat: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_lon,
            origin_lat,
            pixel_width,
            pixel_height,
        }
    }

    /// Map fractional pixel coordinates to geographic coordinates.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_lon + col * self.pixel_width,
            self.origin_lat + row * self.pixel_height,
        )
    }

    /// Map geographic coordinates to fractional pixel coordinates.
    pub fn invert(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (lon - self.origin_lon) / self.pixel_width,
            (lat - self.origin_lat) / self.pixel_height,
        )
    }
}

/// Integer pixel window `(col, row, width, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col: i64,
    pub row: i64,
    pub width: i64,
    pub height: i64,
}

impl PixelWindow {
    /// True if the window has no pixels.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// True if the window lies entirely within a raster of the given shape.
    pub fn fits(&self, (height, width): (usize, usize)) -> bool {
        self.col >= 0
            && self.row >= 0
            && self.col + self.width <= width as i64
            && self.row + self.height <= height as i64
    }
}

/// Result of snapping bounds onto the SRTM pixel grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedGrid {
    /// Bounds through the centres of the outermost pixels.
    pub bounds: GeoBounds,
    /// Pixel-is-area transform (origin at the upper-left corner of pixel (0, 0)).
    pub transform: PixelTransform,
    /// Output shape as `(height, width)`, inclusive of the boundary pixels.
    pub shape: (usize, usize),
}

/// Snap `bounds` outward onto the pixel grid.
///
/// Column and row indices are the floor of the minimum and the ceiling of the
/// maximum bound divided by [`RES`]. Both boundary pixels are included, so
/// `shape = (row_max - row_min + 1, col_max - col_min + 1)`.
///
/// Aligning already-aligned bounds returns the same grid.
pub fn align(bounds: &GeoBounds) -> AlignedGrid {
    let col_min = (bounds.lon_min / RES).floor() as i64;
    let col_max = (bounds.lon_max / RES).ceil() as i64;
    let row_min = (bounds.lat_min / RES).floor() as i64;
    let row_max = (bounds.lat_max / RES).ceil() as i64;

    let lon_min = grid_floor_value(col_min);
    let lon_max = grid_ceil_value(col_max);
    let lat_min = grid_floor_value(row_min);
    let lat_max = grid_ceil_value(row_max);

    let transform = PixelTransform::new(lon_min - RES / 2.0, lat_max + RES / 2.0, RES, -RES);
    let height = (row_max - row_min + 1).max(0) as usize;
    let width = (col_max - col_min + 1).max(0) as usize;

    AlignedGrid {
        bounds: GeoBounds::new(lon_min, lat_min, lon_max, lat_max),
        transform,
        shape: (height, width),
    }
}

/// Smallest degree value `v` with `v / RES >= index`, so flooring it
/// recovers `index`.
fn grid_floor_value(index: i64) -> f64 {
    let target = index as f64;
    let mut value = target * RES;
    for _ in 0..4 {
        if value / RES < target {
            value = ulp_step(value, true);
        } else if ulp_step(value, false) / RES >= target {
            value = ulp_step(value, false);
        } else {
            break;
        }
    }
    value
}

/// Largest degree value `v` with `v / RES <= index`, so ceiling it recovers
/// `index`.
fn grid_ceil_value(index: i64) -> f64 {
    let target = index as f64;
    let mut value = target * RES;
    for _ in 0..4 {
        if value / RES > target {
            value = ulp_step(value, false);
        } else if ulp_step(value, true) / RES <= target {
            value = ulp_step(value, true);
        } else {
            break;
        }
    }
    value
}

/// Adjacent representable `f64` above (`up`) or below `x`.
fn ulp_step(x: f64, up: bool) -> f64 {
    if x == 0.0 {
        let tiny = f64::from_bits(1);
        return if up { tiny } else { -tiny };
    }
    let bits = x.to_bits();
    if (x > 0.0) == up {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// Convert geographic bounds into an integer pixel window of `transform`.
///
/// When `origin_is_area` is true the transform origin is the upper-left
/// corner of pixel (0, 0) and a half-pixel shift moves the window onto pixel
/// centres; otherwise the origin already is the centre of pixel (0, 0).
///
/// Every component must land within [`WINDOW_TOLERANCE`] of an integer. A
/// larger error means the bounds were not computed on this transform's grid
/// (typically a pixel-is-area/point mix-up) and is reported as
/// [`DemError::Precondition`].
pub fn pixel_window(
    bounds: &GeoBounds,
    transform: &PixelTransform,
    origin_is_area: bool,
) -> Result<PixelWindow> {
    let offset = if origin_is_area { 0.5 } else { 0.0 };

    let (col_a, row_a) = transform.invert(bounds.lon_min, bounds.lat_max);
    let (col_b, row_b) = transform.invert(bounds.lon_max, bounds.lat_min);
    let col_off = col_a.min(col_b);
    let row_off = row_a.min(row_b);
    let width = (col_b - col_a).abs();
    let height = (row_b - row_a).abs();

    Ok(PixelWindow {
        col: round_within_tolerance(col_off - offset)?,
        row: round_within_tolerance(row_off - offset)?,
        width: round_within_tolerance(width)?,
        height: round_within_tolerance(height)?,
    })
}

fn round_within_tolerance(value: f64) -> Result<i64> {
    let rounded = value.round();
    if !((rounded - value).abs() <= WINDOW_TOLERANCE) {
        return Err(DemError::precondition(format!(
            "pixel coordinate {} is {} away from the nearest integer (tolerance {})",
            value,
            (rounded - value).abs(),
            WINDOW_TOLERANCE
        )));
    }
    Ok(rounded as i64)
}
