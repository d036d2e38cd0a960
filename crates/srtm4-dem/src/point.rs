//! Point elevation lookup.

use crate::align::{PixelWindow, RES};
use crate::crop::{wrap_lon, Datum, TileProvider};
use crate::datum::DatumTransformer;
use crate::grid::{locate, TileId, LAT_TILES, LON_TILES, MAX_LAT, MIN_LAT};
use crate::raster::{is_nodata, OpenRaster};
use crate::{DemError, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Query points as `(lon, lat)` in degrees.
#[derive(Debug, Clone, PartialEq)]
pub enum Points {
    Single { lon: f64, lat: f64 },
    Batch(Vec<(f64, f64)>),
}

/// Elevations in meters, shaped like the [`Points`] they answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Elevations {
    Single(f32),
    Batch(Vec<f32>),
}

impl Elevations {
    /// All values in query order.
    pub fn into_vec(self) -> Vec<f32> {
        match self {
            Elevations::Single(value) => vec![value],
            Elevations::Batch(values) => values,
        }
    }
}

/// Looks up elevations by bilinear interpolation between the four samples
/// surrounding each point.
///
/// Points outside the ±60° band, on tiles without data, or next to a missing
/// sample get NaN.
pub struct PointSolver {
    provider: Arc<dyn TileProvider>,
    transformer: Option<Arc<dyn DatumTransformer>>,
}

impl std::fmt::Debug for PointSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointSolver")
            .field("has_transformer", &self.transformer.is_some())
            .finish()
    }
}

impl PointSolver {
    pub fn new(provider: Arc<dyn TileProvider>) -> Self {
        Self {
            provider,
            transformer: None,
        }
    }

    /// Enable [`Datum::Ellipsoidal`] lookups using `transformer`.
    pub fn with_transformer(mut self, transformer: Arc<dyn DatumTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Elevation of a single point.
    pub fn elevation(&self, lon: f64, lat: f64, datum: Datum) -> Result<f32> {
        Ok(self.solve(&[(lon, lat)], datum)?.first().copied().unwrap_or(f32::NAN))
    }

    /// Elevations of one or many points.
    pub fn elevations(&self, points: &Points, datum: Datum) -> Result<Elevations> {
        match points {
            Points::Single { lon, lat } => self.elevation(*lon, *lat, datum).map(Elevations::Single),
            Points::Batch(points) => self.solve(points, datum).map(Elevations::Batch),
        }
    }

    fn solve(&self, points: &[(f64, f64)], datum: Datum) -> Result<Vec<f32>> {
        let transformer = match datum {
            Datum::Orthometric => None,
            Datum::Ellipsoidal => Some(
                self.transformer
                    .as_deref()
                    .ok_or(DemError::MissingDatumTransformer)?,
            ),
        };

        let points: Vec<Option<(f64, f64)>> = points
            .iter()
            .map(|&(lon, lat)| covered(lon, lat).then(|| (wrap_lon(lon), lat)))
            .collect();
        let located: Vec<(f64, f64)> = points.iter().flatten().copied().collect();
        let mut ids = locate(&located);
        ids.extend(located.iter().flat_map(|&(lon, lat)| edge_neighbours(lon, lat)));
        ids.sort();
        ids.dedup();
        debug!(points = points.len(), tiles = ids.len(), "solving points");

        let opened = ids
            .par_iter()
            .map(|id| Ok((*id, self.provider.open(*id)?)))
            .collect::<Result<Vec<_>>>()?;
        let tiles: HashMap<TileId, &dyn OpenRaster> = opened
            .iter()
            .filter_map(|(id, tile)| tile.as_deref().map(|t| (*id, t)))
            .collect();

        points
            .par_iter()
            .map(|point| {
                let Some((lon, lat)) = *point else {
                    return Ok(f32::NAN);
                };
                let height = interpolate(&tiles, TileId::containing(lon, lat), lon, lat)?;
                Ok(match transformer {
                    Some(transformer) if !height.is_nan() => {
                        round5(transformer.to_ellipsoid(lon, lat, height))
                    }
                    _ => height as f32,
                })
            })
            .collect()
    }
}

/// True if the point can lie on a tile.
fn covered(lon: f64, lat: f64) -> bool {
    lon.is_finite() && (MIN_LAT..=MAX_LAT).contains(&lat)
}

fn round5(value: f64) -> f32 {
    ((value * 1e5).round() / 1e5) as f32
}

/// The tile east and/or south of `id`, wrapping east across the antimeridian.
/// `None` south of the last tile row.
fn neighbour(id: TileId, east: bool, south: bool) -> Option<TileId> {
    let lon_index = if east {
        id.lon_index() % LON_TILES + 1
    } else {
        id.lon_index()
    };
    let lat_index = if south {
        id.lat_index() + 1
    } else {
        id.lat_index()
    };
    (lat_index <= LAT_TILES).then(|| TileId::new(lon_index, lat_index))
}

/// Tiles besides the containing one that a point within one sample of the
/// east or south tile edge interpolates against.
fn edge_neighbours(lon: f64, lat: f64) -> Vec<TileId> {
    let id = TileId::containing(lon, lat);
    let bounds = id.bounds();
    let east = lon > bounds.lon_max - RES;
    let south = lat < bounds.lat_min + RES;
    [(east, false), (false, south), (east, south)]
        .into_iter()
        .filter(|&(e, s)| e || s)
        .filter_map(|(e, s)| neighbour(id, e, s))
        .collect()
}

/// Bilinear interpolation on the pixel-is-point grid of tile `id`.
///
/// Samples past the tile's east or south edge are taken from the
/// neighbouring tile, which shares the same grid. NaN if the tile is missing
/// or any sample with a non-zero weight is nodata or unavailable.
fn interpolate(
    tiles: &HashMap<TileId, &dyn OpenRaster>,
    id: TileId,
    lon: f64,
    lat: f64,
) -> Result<f64> {
    let Some(&tile) = tiles.get(&id) else {
        return Ok(f64::NAN);
    };
    let (height, width) = tile.shape();
    let (x, y) = tile.transform().invert(lon, lat);
    let x0 = (x.floor().max(0.0) as i64).min(width as i64 - 1);
    let y0 = (y.floor().max(0.0) as i64).min(height as i64 - 1);
    let fx = (x - x0 as f64).clamp(0.0, 1.0);
    let fy = (y - y0 as f64).clamp(0.0, 1.0);

    let corners = [
        (0, 0, (1.0 - fx) * (1.0 - fy)),
        (0, 1, fx * (1.0 - fy)),
        (1, 0, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ];

    // Whole 2x2 block inside the tile: one read
    let inside = x0 + 1 < width as i64 && y0 + 1 < height as i64;
    let block = if inside {
        let window = PixelWindow {
            col: x0,
            row: y0,
            width: 2,
            height: 2,
        };
        Some(tile.read_window(&window)?)
    } else {
        None
    };

    let mut total = 0.0;
    for (dr, dc, weight) in corners {
        if weight == 0.0 {
            continue;
        }
        let value = match &block {
            Some(values) => {
                let v = values[(dr * 2 + dc) as usize];
                valid(tile, v)
            }
            None => sample(tiles, id, tile, y0 + dr, x0 + dc)?,
        };
        match value {
            Some(v) => total += weight * f64::from(v),
            None => return Ok(f64::NAN),
        }
    }
    Ok(total)
}

fn valid(tile: &dyn OpenRaster, value: f32) -> Option<f32> {
    match tile.nodata() {
        Some(nodata) if is_nodata(value, nodata) => None,
        _ => Some(value),
    }
}

/// Sample `(row, col)` of tile `id`'s grid, continuing one sample into the
/// east and south neighbours.
fn sample(
    tiles: &HashMap<TileId, &dyn OpenRaster>,
    id: TileId,
    tile: &dyn OpenRaster,
    row: i64,
    col: i64,
) -> Result<Option<f32>> {
    let (height, width) = tile.shape();
    let (east, south) = (col >= width as i64, row >= height as i64);
    let (tile, row, col) = if east || south {
        let Some(next) = neighbour(id, east, south) else {
            return Ok(None);
        };
        let Some(&next_tile) = tiles.get(&next) else {
            return Ok(None);
        };
        let col = if east { col - width as i64 } else { col };
        let row = if south { row - height as i64 } else { row };
        (next_tile, row, col)
    } else {
        (tile, row, col)
    };

    let window = PixelWindow {
        col,
        row,
        width: 1,
        height: 1,
    };
    if !window.fits(tile.shape()) {
        return Ok(None);
    }
    let values = tile.read_window(&window)?;
    Ok(values.first().and_then(|v| valid(tile, *v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{PixelTransform, RES};
    use approx::assert_relative_eq;

    /// Tile whose sample at `(row, col)` is `col + 2 * row` after shifting by
    /// the offsets, except for a nodata sample at (10, 10).
    struct PlaneTile {
        west: f64,
        north: f64,
        col_offset: i64,
        row_offset: i64,
    }

    impl OpenRaster for PlaneTile {
        fn transform(&self) -> PixelTransform {
            PixelTransform::new(self.west, self.north, RES, -RES)
        }

        fn shape(&self) -> (usize, usize) {
            (6000, 6000)
        }

        fn nodata(&self) -> Option<f32> {
            Some(-32768.0)
        }

        fn read_window(&self, window: &PixelWindow) -> Result<Vec<f32>> {
            let mut out = Vec::new();
            for r in window.row..window.row + window.height {
                for c in window.col..window.col + window.width {
                    out.push(if (r, c) == (10, 10) {
                        -32768.0
                    } else {
                        ((c + self.col_offset) + 2 * (r + self.row_offset)) as f32
                    });
                }
            }
            Ok(out)
        }
    }

    /// Serves plane tiles on land tiles (`lon_index` odd) only.
    struct Planes;

    impl TileProvider for Planes {
        fn open(&self, id: TileId) -> Result<Option<Box<dyn OpenRaster>>> {
            if id.lon_index() % 2 == 0 {
                return Ok(None);
            }
            let bounds = id.bounds();
            Ok(Some(Box::new(PlaneTile {
                west: bounds.lon_min,
                north: bounds.lat_max,
                col_offset: 0,
                row_offset: 0,
            })))
        }
    }

    /// Serves every tile, continuing one plane across tile edges.
    struct ContinuousPlanes;

    impl TileProvider for ContinuousPlanes {
        fn open(&self, id: TileId) -> Result<Option<Box<dyn OpenRaster>>> {
            let bounds = id.bounds();
            Ok(Some(Box::new(PlaneTile {
                west: bounds.lon_min,
                north: bounds.lat_max,
                col_offset: 6000 * i64::from(id.lon_index() - 1),
                row_offset: 6000 * i64::from(id.lat_index() - 1),
            })))
        }
    }

    struct ConstantOffset(f64);

    impl DatumTransformer for ConstantOffset {
        fn to_ellipsoid(&self, _lon: f64, _lat: f64, height: f64) -> f64 {
            height + self.0
        }
    }

    fn solver() -> PointSolver {
        PointSolver::new(Arc::new(Planes))
    }

    #[test]
    fn test_exact_sample() {
        // srtm_37_03: west 0, north 50
        let value = solver().elevation(100.0 * RES, 50.0 - 40.0 * RES, Datum::Orthometric).unwrap();
        assert_relative_eq!(value, 180.0, epsilon = 1e-3);
    }

    #[test]
    fn test_bilinear_between_samples() {
        let value = solver()
            .elevation(100.25 * RES, 50.0 - 40.5 * RES, Datum::Orthometric)
            .unwrap();
        assert_relative_eq!(value, 100.25 + 81.0, epsilon = 1e-3);
    }

    #[test]
    fn test_nodata_neighbour_is_nan() {
        let value = solver()
            .elevation(10.5 * RES, 50.0 - 9.5 * RES, Datum::Orthometric)
            .unwrap();
        assert!(value.is_nan());
    }

    #[test]
    fn test_interpolates_across_tile_edges() {
        let solver = PointSolver::new(Arc::new(ContinuousPlanes));
        // srtm_37_03 starts at global column 216000 and row 12000
        let east = solver
            .elevation(5.0 - 0.5 * RES, 50.0 - 40.0 * RES, Datum::Orthometric)
            .unwrap();
        assert_relative_eq!(east, 221999.5 + 2.0 * 12040.0, epsilon = 1e-2);

        let south = solver
            .elevation(100.0 * RES, 45.0 + 0.5 * RES, Datum::Orthometric)
            .unwrap();
        assert_relative_eq!(south, 216100.0 + 2.0 * 17999.5, epsilon = 1e-2);

        let corner = solver
            .elevation(5.0 - 0.5 * RES, 45.0 + 0.5 * RES, Datum::Orthometric)
            .unwrap();
        assert_relative_eq!(corner, 221999.5 + 2.0 * 17999.5, epsilon = 1e-2);
    }

    #[test]
    fn test_missing_neighbour_tile_is_nan() {
        // East of srtm_37_03 is srtm_38_03, which Planes does not serve
        let value = solver()
            .elevation(5.0 - 0.5 * RES, 50.0 - 40.0 * RES, Datum::Orthometric)
            .unwrap();
        assert!(value.is_nan());
    }

    #[test]
    fn test_batch_keeps_order_and_marks_missing() {
        let points = Points::Batch(vec![
            (100.0 * RES, 50.0 - 40.0 * RES), // land
            (7.0, 45.0),                      // srtm_38_04, no data
            (10.0, 70.0),                     // outside the band
            (100.0 * RES + 360.0, 50.0 - 40.0 * RES), // wrapped longitude
        ]);
        let values = solver()
            .elevations(&points, Datum::Orthometric)
            .unwrap()
            .into_vec();

        assert_eq!(values.len(), 4);
        assert_relative_eq!(values[0], 180.0, epsilon = 1e-3);
        assert!(values[1].is_nan());
        assert!(values[2].is_nan());
        assert_relative_eq!(values[3], 180.0, epsilon = 1e-3);
    }

    #[test]
    fn test_single_point_shape() {
        let result = solver()
            .elevations(&Points::Single { lon: 2.0, lat: 48.0 }, Datum::Orthometric)
            .unwrap();
        assert!(matches!(result, Elevations::Single(_)));
    }

    #[test]
    fn test_ellipsoidal_lookup() {
        let solver = solver().with_transformer(Arc::new(ConstantOffset(47.123456)));
        let value = solver
            .elevation(100.0 * RES, 50.0 - 40.0 * RES, Datum::Ellipsoidal)
            .unwrap();
        assert_relative_eq!(value, 227.12346, epsilon = 1e-3);

        assert!(matches!(
            self::solver().elevation(0.0, 0.0, Datum::Ellipsoidal),
            Err(DemError::MissingDatumTransformer)
        ));
    }
}
