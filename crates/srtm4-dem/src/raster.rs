//! In-memory rasters and the mosaic merge.

use crate::align::{pixel_window, GeoBounds, PixelTransform, PixelWindow};
use crate::{DemError, Result};
use tracing::trace;

/// True if `value` is the `nodata` sentinel. A NaN sentinel matches any NaN.
pub fn is_nodata(value: f32, nodata: f32) -> bool {
    if nodata.is_nan() {
        value.is_nan()
    } else {
        value == nodata
    }
}

/// Single-band `f32` raster in row-major order (north to south, west to east).
///
/// Equality treats NaN as equal to NaN, both for samples and for the nodata
/// sentinel.
#[derive(Debug, Clone)]
pub struct Raster {
    data: Vec<f32>,
    height: usize,
    width: usize,
    nodata: f32,
}

impl PartialEq for Raster {
    fn eq(&self, other: &Self) -> bool {
        let same = |a: f32, b: f32| a == b || (a.is_nan() && b.is_nan());
        self.shape() == other.shape()
            && same(self.nodata, other.nodata)
            && self.data.iter().zip(&other.data).all(|(a, b)| same(*a, *b))
    }
}

impl Raster {
    /// A raster of the given `(height, width)` filled with `nodata`.
    pub fn filled(shape: (usize, usize), nodata: f32) -> Self {
        Self {
            data: vec![nodata; shape.0 * shape.1],
            height: shape.0,
            width: shape.1,
            nodata,
        }
    }

    /// Wrap row-major `data` of the given `(height, width)`.
    pub fn from_vec(shape: (usize, usize), data: Vec<f32>, nodata: f32) -> Result<Self> {
        if data.len() != shape.0 * shape.1 {
            return Err(DemError::precondition(format!(
                "{} values do not fill a {}x{} raster",
                data.len(),
                shape.0,
                shape.1
            )));
        }
        Ok(Self {
            data,
            height: shape.0,
            width: shape.1,
            nodata,
        })
    }

    /// `(height, width)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// The nodata sentinel.
    pub fn nodata(&self) -> f32 {
        self.nodata
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Value at `(row, col)`, or `None` outside the raster.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.height && col < self.width {
            Some(self.data[row * self.width + col])
        } else {
            None
        }
    }

    /// One row of values.
    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.width..(row + 1) * self.width]
    }

    /// Number of pixels holding data.
    pub fn count_valid(&self) -> usize {
        self.data.iter().filter(|v| !is_nodata(**v, self.nodata)).count()
    }

    /// Concatenate two rasters of equal height side by side, `west` first.
    ///
    /// The result keeps the nodata sentinel of `west`.
    pub fn hstack(west: &Raster, east: &Raster) -> Result<Raster> {
        if west.height != east.height {
            return Err(DemError::precondition(format!(
                "cannot concatenate rasters of heights {} and {}",
                west.height, east.height
            )));
        }
        let width = west.width + east.width;
        let mut data = Vec::with_capacity(west.height * width);
        for row in 0..west.height {
            data.extend_from_slice(west.row(row));
            data.extend_from_slice(east.row(row));
        }
        Ok(Raster {
            data,
            height: west.height,
            width,
            nodata: west.nodata,
        })
    }
}

/// A georeferenced single-band raster that can be read by window.
///
/// The transform origin is the centre of pixel (0, 0) (pixel-is-point), as
/// for the SRTM tiles, so [`OpenRaster::bounds`] spans pixel centres from the
/// first sample to one pixel past the last.
pub trait OpenRaster: Send + Sync {
    /// Pixel-is-point transform.
    fn transform(&self) -> PixelTransform;

    /// `(height, width)`.
    fn shape(&self) -> (usize, usize);

    /// Sentinel marking missing samples, if any.
    fn nodata(&self) -> Option<f32>;

    /// Read a window of samples in row-major order.
    ///
    /// The window must lie within the raster.
    fn read_window(&self, window: &PixelWindow) -> Result<Vec<f32>>;

    /// Extent covered by the raster.
    fn bounds(&self) -> GeoBounds {
        let transform = self.transform();
        let (height, width) = self.shape();
        let (west, north) = transform.apply(0.0, 0.0);
        let (east, south) = transform.apply(width as f64, height as f64);
        GeoBounds::new(west, south, east, north)
    }
}

/// A raster held in memory together with its transform.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    raster: Raster,
    transform: PixelTransform,
}

impl MemoryRaster {
    /// `transform` must follow the pixel-is-point convention of [`OpenRaster`].
    pub fn new(raster: Raster, transform: PixelTransform) -> Self {
        Self { raster, transform }
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }
}

impl OpenRaster for MemoryRaster {
    fn transform(&self) -> PixelTransform {
        self.transform
    }

    fn shape(&self) -> (usize, usize) {
        self.raster.shape()
    }

    fn nodata(&self) -> Option<f32> {
        Some(self.raster.nodata())
    }

    fn read_window(&self, window: &PixelWindow) -> Result<Vec<f32>> {
        if !window.fits(self.raster.shape()) {
            return Err(DemError::precondition(format!(
                "window {:?} outside raster of shape {:?}",
                window,
                self.raster.shape()
            )));
        }
        let (col, width) = (window.col as usize, window.width as usize);
        let mut out = Vec::with_capacity(width * window.height as usize);
        for row in window.row as usize..(window.row + window.height) as usize {
            out.extend_from_slice(&self.raster.row(row)[col..col + width]);
        }
        Ok(out)
    }
}

/// Assemble `tiles` into a raster of `shape` on the pixel-is-area `transform`.
///
/// The destination starts filled with `nodata`. Each tile fills the pixels
/// it covers that are still nodata with its own valid samples, so with
/// non-overlapping tiles the result does not depend on tile order. Where
/// tiles overlap the first one wins.
pub fn merge(
    tiles: &[&dyn OpenRaster],
    transform: &PixelTransform,
    shape: (usize, usize),
    nodata: f32,
) -> Result<Raster> {
    let mut dst = Raster::filled(shape, nodata);
    let (dst_height, dst_width) = shape;

    // Pixel-centre extent, one pixel past the last row and column
    let (west, north) = transform.apply(0.5, 0.5);
    let (east, south) = transform.apply(dst_width as f64 + 0.5, dst_height as f64 + 0.5);
    let dst_bounds = GeoBounds::new(west, south, east, north);

    for tile in tiles {
        let Some(overlap) = dst_bounds.intersection(&tile.bounds()) else {
            continue;
        };

        let dst_window = pixel_window(&overlap, transform, true)?;
        let src_window = pixel_window(&overlap, &tile.transform(), false)?;
        if dst_window.is_empty() {
            continue;
        }
        if (dst_window.width, dst_window.height) != (src_window.width, src_window.height) {
            return Err(DemError::precondition(format!(
                "destination window {:?} and source window {:?} differ in size",
                dst_window, src_window
            )));
        }
        if !dst_window.fits(shape) {
            return Err(DemError::precondition(format!(
                "destination window {:?} outside raster of shape {:?}",
                dst_window, shape
            )));
        }

        trace!(?dst_window, ?src_window, "merging tile window");
        let src = tile.read_window(&src_window)?;
        let src_nodata = tile.nodata();

        let width = dst_window.width as usize;
        let col = dst_window.col as usize;
        for (i, src_row) in src.chunks_exact(width).enumerate() {
            let row = dst_window.row as usize + i;
            let start = row * dst_width + col;
            let dst_row = &mut dst.data_mut()[start..start + width];
            for (d, &s) in dst_row.iter_mut().zip(src_row) {
                let src_missing = src_nodata.map_or(false, |nd| is_nodata(s, nd));
                if is_nodata(*d, nodata) && !src_missing {
                    *d = s;
                }
            }
        }
    }

    Ok(dst)
}
