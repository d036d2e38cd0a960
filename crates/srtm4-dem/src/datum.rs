//! Vertical datum conversion from geoid (orthometric) to ellipsoidal heights.

use crate::{DemError, Result};
use byteorder::{BigEndian as BE, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Converts geoid-referenced heights to ellipsoid-referenced heights.
pub trait DatumTransformer: Send + Sync {
    /// Ellipsoidal height of a point at `(lon, lat)` whose orthometric height
    /// is `height`, all in degrees and meters. NaN if the point is not covered.
    fn to_ellipsoid(&self, lon: f64, lat: f64, height: f64) -> f64;
}

/// Cells holding this value in a `.gtx` grid have no undulation.
const GTX_MISSING: f32 = -88.8888;

/// Geoid undulation grid in the PROJ `.gtx` format (e.g. `egm96_15.gtx`).
///
/// The file is a big-endian header `lat0, lon0, dlat, dlon: f64`,
/// `rows, cols: i32` followed by `rows * cols` `f32` undulations, row 0 at
/// `lat0` (south) and rows running north.
#[derive(Debug, Clone)]
pub struct GeoidGrid {
    lat0: f64,
    lon0: f64,
    dlat: f64,
    dlon: f64,
    rows: usize,
    cols: usize,
    /// Number of columns spanning 360°, if the grid is global in longitude.
    wrap_cols: Option<f64>,
    values: Vec<f32>,
}

impl GeoidGrid {
    /// Load a `.gtx` file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let grid = Self::from_reader(BufReader::new(File::open(path)?))?;
        debug!(
            path = %path.display(),
            rows = grid.rows,
            cols = grid.cols,
            "loaded geoid grid"
        );
        Ok(grid)
    }

    /// Parse a `.gtx` grid.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let lat0 = reader.read_f64::<BE>()?;
        let lon0 = reader.read_f64::<BE>()?;
        let dlat = reader.read_f64::<BE>()?;
        let dlon = reader.read_f64::<BE>()?;
        let rows = reader.read_i32::<BE>()?;
        let cols = reader.read_i32::<BE>()?;

        if rows < 2 || cols < 2 || !(dlat > 0.0) || !(dlon > 0.0) {
            return Err(DemError::InvalidGeoid(format!(
                "bad header: {}x{} cells of {}x{} degrees",
                rows, cols, dlat, dlon
            )));
        }
        let (rows, cols) = (rows as usize, cols as usize);

        let mut values = vec![0f32; rows * cols];
        reader
            .read_f32_into::<BE>(&mut values)
            .map_err(|e| DemError::InvalidGeoid(format!("expected {} values: {}", rows * cols, e)))?;

        let full_turn = 360.0 / dlon;
        let wrap_cols = (cols as f64 >= full_turn - 0.5).then_some(full_turn);

        Ok(Self {
            lat0,
            lon0,
            dlat,
            dlon,
            rows,
            cols,
            wrap_cols,
            values,
        })
    }

    /// Bilinearly interpolated undulation (geoid height above the ellipsoid)
    /// at `(lon, lat)`, or `None` outside the grid.
    pub fn undulation(&self, lon: f64, lat: f64) -> Option<f64> {
        let y = (lat - self.lat0) / self.dlat;
        let mut x = (lon - self.lon0) / self.dlon;
        if let Some(turn) = self.wrap_cols {
            x = x.rem_euclid(turn);
        }

        let max_y = (self.rows - 1) as f64;
        if !(0.0..=max_y).contains(&y) || x < 0.0 {
            return None;
        }

        let y0 = (y.floor() as usize).min(self.rows - 2);
        let fy = y - y0 as f64;

        let x0 = x.floor() as usize;
        let fx = x - x0 as f64;
        let x1 = if x0 + 1 < self.cols {
            x0 + 1
        } else if self.wrap_cols.is_some() {
            (x0 + 1) % self.cols
        } else if fx == 0.0 && x0 < self.cols {
            x0
        } else {
            return None;
        };
        if x0 >= self.cols {
            return None;
        }

        let v00 = self.cell(y0, x0)?;
        let v10 = self.cell(y0, x1)?;
        let v01 = self.cell(y0 + 1, x0)?;
        let v11 = self.cell(y0 + 1, x1)?;

        Some(
            v00 * (1.0 - fx) * (1.0 - fy)
                + v10 * fx * (1.0 - fy)
                + v01 * (1.0 - fx) * fy
                + v11 * fx * fy,
        )
    }

    fn cell(&self, row: usize, col: usize) -> Option<f64> {
        let value = self.values[row * self.cols + col];
        if value.is_nan() || (value - GTX_MISSING).abs() < 1e-3 {
            None
        } else {
            Some(f64::from(value))
        }
    }
}

impl DatumTransformer for GeoidGrid {
    fn to_ellipsoid(&self, lon: f64, lat: f64, height: f64) -> f64 {
        match self.undulation(lon, lat) {
            Some(n) => height + n,
            None => f64::NAN,
        }
    }
}
