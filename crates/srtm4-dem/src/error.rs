//! Error types for the DEM crate.

use thiserror::Error;

/// Errors that can occur when fetching tiles or assembling crops.
///
/// A tile without elevation coverage and a crop outside the covered latitude
/// band are normal outcomes, not errors; see [`crate::TileStatus`] and
/// [`crate::CropOutcome`].
#[derive(Debug, Error)]
pub enum DemError {
    /// I/O error reading or writing a file (including lock files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decode or encode error.
    #[error("TIFF error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing required tags.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// Unexpected failure while reading a tile archive.
    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Fetching a tile archive failed after retries, or with a non-retryable status.
    #[error("Failed to download tile {tile} from {url}: {reason}")]
    Network {
        /// Canonical tile name.
        tile: String,
        /// Archive URL.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Tile name does not follow the `srtm_LL_LL` pattern.
    #[error("Invalid tile name: {0}")]
    InvalidTileName(String),

    /// A computation invariant was violated (bad bounds, pixel rounding
    /// beyond tolerance, datum conversion that changed nothing).
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Ellipsoidal heights were requested but no datum transformer is configured.
    #[error("Ellipsoidal heights requested but no datum transformer is configured")]
    MissingDatumTransformer,

    /// Invalid geoid grid file.
    #[error("Invalid geoid grid: {0}")]
    InvalidGeoid(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

impl DemError {
    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        DemError::Precondition(msg.into())
    }
}
