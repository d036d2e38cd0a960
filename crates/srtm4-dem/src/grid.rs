//! SRTM 5x5 degree tile grid.
//!
//! Tiles are identified by a `(lon_index, lat_index)` pair:
//! - `lon_index` runs 1..=72 in 5° steps eastward from 180°W
//! - `lat_index` runs 1..=24 in 5° steps southward from 60°N
//!
//! The canonical name of a tile is `srtm_LL_LL` (e.g. `srtm_37_04`), used
//! both as the base name of the cached artifact and as the lock key.

use crate::align::GeoBounds;
use crate::{DemError, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Tile edge length in degrees.
pub const TILE_SIZE_DEG: f64 = 5.0;

/// Number of tile columns (longitude).
pub const LON_TILES: u8 = 72;

/// Number of tile rows (latitude).
pub const LAT_TILES: u8 = 24;

/// Northern edge of the covered latitude band.
pub const MAX_LAT: f64 = 60.0;

/// Southern edge of the covered latitude band.
pub const MIN_LAT: f64 = -60.0;

/// Identifier of one 5x5 degree SRTM tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileId {
    lon_index: u8,
    lat_index: u8,
}

impl TileId {
    /// Create a tile identifier.
    ///
    /// # Panics
    /// Panics if an index is outside the grid. Indices come from the locator
    /// or a parsed name, so an out-of-range value is a bug.
    pub fn new(lon_index: u8, lat_index: u8) -> Self {
        assert!(
            (1..=LON_TILES).contains(&lon_index),
            "lon_index={} out of range 1..={}",
            lon_index,
            LON_TILES
        );
        assert!(
            (1..=LAT_TILES).contains(&lat_index),
            "lat_index={} out of range 1..={}",
            lat_index,
            LAT_TILES
        );
        Self {
            lon_index,
            lat_index,
        }
    }

    /// Longitude index, 1 at 180°W.
    pub fn lon_index(&self) -> u8 {
        self.lon_index
    }

    /// Latitude index, 1 at 60°N.
    pub fn lat_index(&self) -> u8 {
        self.lat_index
    }

    /// Canonical tile name, e.g. `srtm_37_04`.
    pub fn name(&self) -> String {
        format!("srtm_{:02}_{:02}", self.lon_index, self.lat_index)
    }

    /// Geographic extent of the tile's 5x5 degree cell.
    pub fn bounds(&self) -> GeoBounds {
        let west = -180.0 + TILE_SIZE_DEG * f64::from(self.lon_index - 1);
        let north = MAX_LAT - TILE_SIZE_DEG * f64::from(self.lat_index - 1);
        GeoBounds::new(west, north - TILE_SIZE_DEG, west + TILE_SIZE_DEG, north)
    }

    /// The tile whose grid holds the sample at `(lon, lat)`.
    ///
    /// Tiles use pixel-is-point sampling anchored at their north-west corner,
    /// so a sample exactly on a tile's west or north edge belongs to that tile.
    /// Coordinates outside the grid are clamped to the nearest tile.
    pub fn containing(lon: f64, lat: f64) -> Self {
        let lon_index = ((lon + 180.0) / TILE_SIZE_DEG).floor() + 1.0;
        let lat_index = ((MAX_LAT - lat) / TILE_SIZE_DEG).floor() + 1.0;
        Self {
            lon_index: lon_index.clamp(1.0, f64::from(LON_TILES)) as u8,
            lat_index: lat_index.clamp(1.0, f64::from(LAT_TILES)) as u8,
        }
    }

    /// All tiles needed to cover `bounds`, in row-major order (north to
    /// south, then west to east).
    ///
    /// The bounds must not cross the antimeridian.
    pub fn covering(bounds: &GeoBounds) -> Vec<Self> {
        let north_west = Self::containing(bounds.lon_min, bounds.lat_max);
        let south_east = Self::containing(bounds.lon_max, bounds.lat_min);

        let mut tiles = Vec::new();
        for lat_index in north_west.lat_index..=south_east.lat_index {
            for lon_index in north_west.lon_index..=south_east.lon_index {
                tiles.push(Self::new(lon_index, lat_index));
            }
        }
        tiles
    }
}

impl Ord for TileId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lat_index
            .cmp(&other.lat_index)
            .then(self.lon_index.cmp(&other.lon_index))
    }
}

impl PartialOrd for TileId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "srtm_{:02}_{:02}", self.lon_index, self.lat_index)
    }
}

impl FromStr for TileId {
    type Err = DemError;

    fn from_str(name: &str) -> Result<Self> {
        let invalid = || DemError::InvalidTileName(name.to_string());

        let mut parts = name.split('_');
        if parts.next() != Some("srtm") {
            return Err(invalid());
        }
        let lon_index: u8 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)?;
        let lat_index: u8 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)?;
        if parts.next().is_some()
            || !(1..=LON_TILES).contains(&lon_index)
            || !(1..=LAT_TILES).contains(&lat_index)
        {
            return Err(invalid());
        }

        Ok(Self {
            lon_index,
            lat_index,
        })
    }
}

/// Sorted, de-duplicated list of tiles holding the given `(lon, lat)` points.
pub fn locate(points: &[(f64, f64)]) -> Vec<TileId> {
    let mut tiles: Vec<TileId> = points
        .iter()
        .map(|&(lon, lat)| TileId::containing(lon, lat))
        .collect();
    tiles.sort();
    tiles.dedup();
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        let id = TileId::new(37, 4);
        assert_eq!(id.name(), "srtm_37_04");
        assert_eq!(id.to_string(), "srtm_37_04");
        assert_eq!("srtm_37_04".parse::<TileId>().unwrap(), id);
        assert_eq!("srtm_72_24".parse::<TileId>().unwrap(), TileId::new(72, 24));
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "srtm", "srtm_37", "srtm_00_04", "srtm_73_01", "srtm_01_25", "tile_37_04", "srtm_37_04_x"] {
            assert!(name.parse::<TileId>().is_err(), "{} should not parse", name);
        }
    }

    #[test]
    fn test_bounds() {
        let b = TileId::new(37, 4).bounds();
        assert_eq!(b.lon_min, 0.0);
        assert_eq!(b.lon_max, 5.0);
        assert_eq!(b.lat_max, 45.0);
        assert_eq!(b.lat_min, 40.0);

        let b = TileId::new(1, 1).bounds();
        assert_eq!((b.lon_min, b.lat_max), (-180.0, 60.0));
    }

    #[test]
    fn test_containing() {
        // Paris
        assert_eq!(TileId::containing(2.0, 48.0), TileId::new(37, 3));
        // Samples on the west/north edge belong to the tile starting there
        assert_eq!(TileId::containing(25.0, 45.0), TileId::new(42, 4));
        assert_eq!(TileId::containing(20.0, 50.0), TileId::new(41, 3));
        // Clamped at the grid border
        assert_eq!(TileId::containing(180.0, -60.0), TileId::new(72, 24));
        assert_eq!(TileId::containing(-180.0, 75.0), TileId::new(1, 1));
    }

    #[test]
    fn test_covering_row_major() {
        let bounds = GeoBounds::new(-112.0, 16.0, -108.0, 18.0);
        let tiles = TileId::covering(&bounds);
        assert_eq!(tiles, vec![TileId::new(14, 9), TileId::new(15, 9)]);

        let bounds = GeoBounds::new(4.0, 44.0, 6.0, 46.0);
        let names: Vec<String> = TileId::covering(&bounds).iter().map(TileId::name).collect();
        assert_eq!(names, vec!["srtm_37_03", "srtm_38_03", "srtm_37_04", "srtm_38_04"]);
    }

    #[test]
    fn test_locate_sorted_unique() {
        let tiles = locate(&[(6.0, 44.0), (2.0, 48.0), (2.1, 48.1), (4.0, 46.0)]);
        assert_eq!(
            tiles,
            vec![TileId::new(37, 3), TileId::new(38, 4)]
        );
    }
}
