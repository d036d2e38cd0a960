//! Example: Query elevation at a point, downloading the tile if needed.
//!
//! Usage: cargo run --example query_elevation -- <lon> <lat> [geoid.gtx]

use srtm4_dem::{CacheConfig, Datum, GeoidGrid, PointSolver, TileCache, TileId};
use std::env;
use std::sync::Arc;
use std::time::Instant;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <lon> <lat> [geoid.gtx]", args[0]);
        eprintln!("Example: {} 2.0 48.0 ./egm96_15.gtx", args[0]);
        std::process::exit(1);
    }

    let lon: f64 = args[1].parse().expect("Invalid longitude");
    let lat: f64 = args[2].parse().expect("Invalid latitude");

    let config = CacheConfig::from_env();
    println!("Tile cache: {}", config.cache_dir.display());
    let cache = Arc::new(TileCache::new(config).expect("Failed to create tile cache"));

    let tile = TileId::containing(lon, lat);
    println!("Point ({}, {}) is on tile {}", lon, lat, tile);

    let mut solver = PointSolver::new(cache.clone());
    let datum = match args.get(3) {
        Some(path) => {
            let geoid = GeoidGrid::open(path).expect("Failed to load geoid grid");
            solver = solver.with_transformer(Arc::new(geoid));
            Datum::Ellipsoidal
        }
        None => Datum::Orthometric,
    };

    let start = Instant::now();
    match solver.elevation(lon, lat, datum) {
        Ok(elevation) if elevation.is_nan() => {
            println!("No elevation data at this point");
        }
        Ok(elevation) => {
            println!(
                "Elevation ({}): {:.3} meters ({:.2}s)",
                datum,
                elevation,
                start.elapsed().as_secs_f64()
            );
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let stats = cache.download_stats();
    println!(
        "Downloaded {} archives ({} bytes)",
        stats.archives_fetched, stats.bytes_downloaded
    );
}
