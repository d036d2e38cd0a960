use clap::{Args, Parser, Subcommand};
use srtm4_dem::{Datum, GeoBounds, TileId};
use std::path::PathBuf;

/// Crop and query SRTM 90m elevation tiles.
#[derive(Parser, Debug)]
#[command(name = "srtm4", version)]
pub struct Cli {
    /// YAML file with cache settings.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tile cache directory. Overrides the config file and SRTM4_CACHE.
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crop a rectangle and write it as a GeoTIFF.
    Crop {
        /// LON_MIN,LAT_MIN,LON_MAX,LAT_MAX in degrees. LON_MAX may exceed
        /// 180 to cross the antimeridian.
        #[arg(long, allow_hyphen_values = true, value_parser = parse_bounds)]
        bounds: GeoBounds,

        #[command(flatten)]
        height: HeightArgs,

        /// Output GeoTIFF.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the elevation at one or more points.
    Point {
        /// Points as LON,LAT.
        #[arg(required = true, allow_hyphen_values = true, value_parser = parse_lon_lat)]
        points: Vec<(f64, f64)>,

        #[command(flatten)]
        height: HeightArgs,
    },

    /// Download tiles into the cache.
    Fetch {
        /// Tile names, e.g. srtm_37_04.
        #[arg(required = true)]
        tiles: Vec<TileId>,
    },

    /// Print the tiles covering the given points.
    WhichTile {
        /// Points as LON,LAT.
        #[arg(required = true, allow_hyphen_values = true, value_parser = parse_lon_lat)]
        points: Vec<(f64, f64)>,
    },
}

#[derive(Debug, Args)]
pub struct HeightArgs {
    /// Vertical datum of the output heights.
    #[arg(long, default_value_t = Datum::Orthometric)]
    pub datum: Datum,

    /// PROJ .gtx geoid grid for ellipsoidal heights. Defaults to SRTM4_GEOID.
    #[arg(long)]
    pub geoid: Option<PathBuf>,
}

fn parse_numbers(text: &str, count: usize) -> Result<Vec<f64>, String> {
    let values = text
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| format!("'{}': {}", part.trim(), e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != count {
        return Err(format!("expected {} comma-separated numbers, got {}", count, values.len()));
    }
    Ok(values)
}

pub fn parse_lon_lat(text: &str) -> Result<(f64, f64), String> {
    let values = parse_numbers(text, 2)?;
    Ok((values[0], values[1]))
}

pub fn parse_bounds(text: &str) -> Result<GeoBounds, String> {
    let v = parse_numbers(text, 4)?;
    Ok(GeoBounds::new(v[0], v[1], v[2], v[3]))
}
