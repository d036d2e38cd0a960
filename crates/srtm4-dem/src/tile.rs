//! Extracted SRTM tile GeoTIFF reader.

use crate::align::{PixelTransform, PixelWindow};
use crate::raster::OpenRaster;
use crate::{DemError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

/// Nodata value of the CGIAR SRTM tiles when the file does not declare one.
pub const SRTM_NODATA: f32 = -32768.0;

/// An open SRTM tile.
///
/// SRTM 90m tiles are 6000 x 6000 samples covering 5 x 5 degrees. The tiles
/// declare `AREA_OR_POINT=Area` but their tiepoint is the centre of the first
/// sample, so the transform read here is treated as pixel-is-point.
///
/// Samples are decoded one strip or tile at a time for each window read; the
/// whole image is never held in memory.
pub struct TileRaster {
    path: PathBuf,
    decoder: Mutex<Decoder<BufReader<File>>>,
    width: usize,
    height: usize,
    transform: PixelTransform,
    nodata: Option<f32>,
}

impl std::fmt::Debug for TileRaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileRaster")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("transform", &self.transform)
            .field("nodata", &self.nodata)
            .finish()
    }
}

impl TileRaster {
    /// Open a tile GeoTIFF.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = BufReader::new(File::open(path)?);
        let mut decoder = Decoder::new(file)?;

        // 6000 x 6000 f32 tiles are ~144 MB decoded
        let mut limits = Limits::default();
        limits.decoding_buffer_size = 1024 * 1024 * 1024; // 1 GB
        limits.intermediate_buffer_size = 1024 * 1024 * 1024; // 1 GB
        limits.ifd_value_size = 1024 * 1024 * 1024;
        decoder = decoder.with_limits(limits);

        let (width, height) = decoder.dimensions()?;
        let transform = read_transform(&mut decoder, path)?;
        let nodata = read_nodata_value(&mut decoder);

        Ok(Self {
            path: path.to_path_buf(),
            decoder: Mutex::new(decoder),
            width: width as usize,
            height: height as usize,
            transform,
            nodata,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OpenRaster for TileRaster {
    fn transform(&self) -> PixelTransform {
        self.transform
    }

    fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    fn read_window(&self, window: &PixelWindow) -> Result<Vec<f32>> {
        if !window.fits(self.shape()) {
            return Err(DemError::precondition(format!(
                "window {:?} outside {} of shape {:?}",
                window,
                self.path.display(),
                self.shape()
            )));
        }
        let mut out = vec![self.nodata.unwrap_or(f32::NAN); (window.width * window.height) as usize];
        if window.is_empty() {
            return Ok(out);
        }

        let mut decoder = self
            .decoder
            .lock()
            .map_err(|_| DemError::InvalidGeoTiff(format!("{}: decoder poisoned", self.path.display())))?;

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let (chunk_width, chunk_height) = (chunk_width as usize, chunk_height as usize);
        let chunks_across = (self.width + chunk_width - 1) / chunk_width;

        let (col0, row0) = (window.col as usize, window.row as usize);
        let (col1, row1) = (col0 + window.width as usize, row0 + window.height as usize);
        let out_width = window.width as usize;

        for chunk_row in row0 / chunk_height..=(row1 - 1) / chunk_height {
            for chunk_col in col0 / chunk_width..=(col1 - 1) / chunk_width {
                let index = (chunk_row * chunks_across + chunk_col) as u32;
                let values = decode_samples(decoder.read_chunk(index)?);
                let (data_width, data_height) = decoder.chunk_data_dimensions(index);
                let data_width = data_width as usize;

                let x0 = chunk_col * chunk_width;
                let y0 = chunk_row * chunk_height;
                let xs = col0.max(x0)..col1.min(x0 + data_width);
                for y in row0.max(y0)..row1.min(y0 + data_height as usize) {
                    let src = (y - y0) * data_width;
                    let dst = (y - row0) * out_width;
                    for x in xs.clone() {
                        out[dst + x - col0] = values[src + x - x0];
                    }
                }
            }
        }

        Ok(out)
    }
}

/// Read the transform from ModelTiepoint and ModelPixelScale.
fn read_transform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<PixelTransform> {
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag);
    let pixel_scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag);

    match (tiepoint, pixel_scale) {
        (Ok(tiepoint), Ok(scale)) if tiepoint.len() >= 6 && scale.len() >= 2 => {
            // Tiepoint format: [i, j, k, x, y, z] ties raster (i, j) to model (x, y)
            let (i, j) = (tiepoint[0], tiepoint[1]);
            let (x, y) = (tiepoint[3], tiepoint[4]);
            Ok(PixelTransform::new(
                x - i * scale[0],
                y + j * scale[1],
                scale[0],
                -scale[1],
            ))
        }
        _ => Err(DemError::InvalidGeoTiff(format!(
            "{}: missing ModelTiepoint/ModelPixelScale",
            path.display()
        ))),
    }
}

/// Convert decoded samples of any type to `f32`.
fn decode_samples(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
    }
}

/// No-data value from the GDAL_NODATA tag, falling back to the SRTM default.
fn read_nodata_value<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
    match decoder.get_tag_ascii_string(Tag::GdalNodata) {
        Ok(text) => text.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok(),
        Err(_) => Some(SRTM_NODATA),
    }
}
