mod options;

use anyhow::{bail, Context, Result};
use clap::Parser;
use options::{Cli, Command, HeightArgs};
use srtm4_dem::{
    geoid_path_from_env, locate, CacheConfig, CropOutcome, Cropper, Datum, DatumTransformer,
    GeoidGrid, PointSolver, Points, TileCache, TileStatus,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.cmd {
        Command::Crop {
            bounds,
            height,
            output,
        } => {
            let cache = open_cache(&cli)?;
            let mut cropper = Cropper::new(cache.clone());
            if let Some(geoid) = load_geoid(height)? {
                cropper = cropper.with_transformer(geoid);
            }
            match cropper.crop(bounds, height.datum)? {
                CropOutcome::Crop(crop) => {
                    let (rows, cols) = crop.raster.shape();
                    srtm4_dem::write_geotiff(&crop, output)
                        .with_context(|| format!("writing {}", output.display()))?;
                    println!("{} x {} crop written to {}", rows, cols, output.display());
                }
                CropOutcome::NoCoverage => bail!("no SRTM data within the requested bounds"),
            }
            report_downloads(&cache);
        }
        Command::Point { points, height } => {
            let cache = open_cache(&cli)?;
            let mut solver = PointSolver::new(cache.clone());
            if let Some(geoid) = load_geoid(height)? {
                solver = solver.with_transformer(geoid);
            }
            let values = solver
                .elevations(&Points::Batch(points.clone()), height.datum)?
                .into_vec();
            for ((lon, lat), value) in points.iter().zip(values) {
                println!("{} {} {}", lon, lat, value);
            }
            report_downloads(&cache);
        }
        Command::Fetch { tiles } => {
            let cache = open_cache(&cli)?;
            for tile in tiles {
                match cache.ensure_tile(*tile)? {
                    TileStatus::Present(path) => println!("{} {}", tile, path.display()),
                    TileStatus::Unavailable => println!("{} unavailable", tile),
                }
            }
            report_downloads(&cache);
        }
        Command::WhichTile { points } => {
            for tile in locate(points) {
                println!("{}", tile);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_cache(cli: &Cli) -> Result<Arc<TileCache>> {
    let mut config = match &cli.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CacheConfig::from_env(),
    };
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    info!(cache_dir = %config.cache_dir.display(), "using tile cache");
    Ok(Arc::new(TileCache::new(config)?))
}

/// Geoid grid from `--geoid` or SRTM4_GEOID when ellipsoidal heights are requested.
fn load_geoid(args: &HeightArgs) -> Result<Option<Arc<dyn DatumTransformer>>> {
    if args.datum == Datum::Orthometric {
        return Ok(None);
    }
    let Some(path) = args.geoid.clone().or_else(geoid_path_from_env) else {
        bail!("ellipsoidal heights need a geoid grid: pass --geoid or set SRTM4_GEOID");
    };
    let grid: Arc<dyn DatumTransformer> = Arc::new(
        GeoidGrid::open(&path).with_context(|| format!("loading geoid {}", path.display()))?,
    );
    Ok(Some(grid))
}

fn report_downloads(cache: &TileCache) {
    let stats = cache.download_stats();
    if stats.archives_fetched > 0 {
        info!(
            archives = stats.archives_fetched,
            bytes = stats.bytes_downloaded,
            extracted = stats.tiles_extracted,
            "downloads"
        );
    }
}
