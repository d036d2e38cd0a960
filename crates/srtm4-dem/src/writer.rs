//! GeoTIFF output for crops.

use crate::crop::Crop;
use crate::{DemError, Result};
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::compression::{Deflate, DeflateLevel};
use tiff::encoder::{TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tracing::info;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;

// GeoKey values
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

const ROWS_PER_STRIP: u32 = 256;

/// Write `crop` as a single-band float32 GeoTIFF at `path`.
///
/// Data is deflate-compressed in strips of 256 rows, without a predictor:
/// the `tiff` 0.9 encoder writes neither tiled layouts nor predictors, so
/// this differs from the 256x256 tiled, predictor 2 layout GDAL would
/// produce. The transform is stored as ModelTiepoint/ModelPixelScale with
/// pixel-is-area raster type and the crop's geographic CRS. The vertical
/// datum is not encoded.
pub fn write_geotiff<P: AsRef<Path>>(crop: &Crop, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    write_geotiff_to(crop, &mut writer)?;
    writer.flush()?;
    info!(
        path = %path.display(),
        height = crop.raster.height(),
        width = crop.raster.width(),
        "wrote crop"
    );
    Ok(())
}

/// Write `crop` as a GeoTIFF to any seekable writer.
pub fn write_geotiff_to<W: Write + Seek>(crop: &Crop, writer: W) -> Result<()> {
    let (height, width) = crop.raster.shape();
    if height == 0 || width == 0 {
        return Err(DemError::precondition("crop has zero dimensions"));
    }
    let epsg = u16::try_from(crop.epsg)
        .map_err(|_| DemError::precondition(format!("EPSG code {} out of range", crop.epsg)))?;

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image_with_compression::<Gray32Float, _>(
        width as u32,
        height as u32,
        Deflate::with_level(DeflateLevel::Balanced),
    )?;
    image.rows_per_strip(ROWS_PER_STRIP.min(height as u32))?;
    write_geotiff_tags(crop, epsg, image.encoder())?;
    image.write_data(crop.raster.data())?;
    Ok(())
}

fn write_geotiff_tags<W: Write + Seek, K: TiffKind>(
    crop: &Crop,
    epsg: u16,
    dir: &mut tiff::encoder::DirectoryEncoder<W, K>,
) -> Result<()> {
    let transform = &crop.transform;

    // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
    let pixel_scale = [transform.pixel_width, -transform.pixel_height, 0.0];
    dir.write_tag(Tag::ModelPixelScaleTag, pixel_scale.as_slice())?;

    // ModelTiepoint: [I, J, K, X, Y, Z], upper-left corner of pixel (0, 0)
    let tiepoint = [0.0, 0.0, 0.0, transform.origin_lon, transform.origin_lat, 0.0];
    dir.write_tag(Tag::ModelTiepointTag, tiepoint.as_slice())?;

    // [KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys,
    //  KeyID, TIFFTagLocation, Count, Value, ...]
    let geokeys: [u16; 16] = [
        1,
        1,
        0,
        3,
        GT_MODEL_TYPE_GEO_KEY,
        0,
        1,
        MODEL_TYPE_GEOGRAPHIC,
        GT_RASTER_TYPE_GEO_KEY,
        0,
        1,
        RASTER_PIXEL_IS_AREA,
        GEOGRAPHIC_TYPE_GEO_KEY,
        0,
        1,
        epsg,
    ];
    dir.write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())?;

    let nodata = crop.raster.nodata();
    let nodata = if nodata.is_nan() {
        "nan".to_string()
    } else {
        nodata.to_string()
    };
    dir.write_tag(Tag::GdalNodata, nodata.as_str())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{PixelTransform, RES};
    use crate::crop::CROP_EPSG;
    use crate::raster::{OpenRaster, Raster};
    use tiff::decoder::{Decoder, DecodingResult};

    fn sample_crop(height: usize, width: usize) -> Crop {
        let mut data: Vec<f32> = (0..height * width).map(|i| i as f32 * 0.5).collect();
        data[1] = f32::NAN;
        Crop {
            raster: Raster::from_vec((height, width), data, f32::NAN).unwrap(),
            transform: PixelTransform::new(2.0 - RES / 2.0, 48.0 + RES / 2.0, RES, -RES),
            epsg: CROP_EPSG,
        }
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop.tif");
        let crop = sample_crop(300, 7);
        write_geotiff(&crop, &path).unwrap();

        let mut decoder = Decoder::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (7, 300));

        let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).unwrap();
        assert_eq!(tiepoint[3], crop.transform.origin_lon);
        assert_eq!(tiepoint[4], crop.transform.origin_lat);
        let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).unwrap();
        assert_eq!(scale[..2], [RES, RES]);

        let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).unwrap();
        assert_eq!(keys[15], 4326);
        assert_eq!(keys[11], RASTER_PIXEL_IS_AREA);

        let nodata = decoder.get_tag_ascii_string(Tag::GdalNodata).unwrap();
        assert_eq!(nodata.trim_end_matches('\0'), "nan");

        match decoder.read_image().unwrap() {
            DecodingResult::F32(values) => {
                assert_eq!(values.len(), 300 * 7);
                assert!(values[1].is_nan());
                assert_eq!(values[2099], 2099.0 * 0.5);
            }
            _ => panic!("expected f32 samples"),
        }
    }

    #[test]
    fn test_written_crop_opens_as_tile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop.tif");
        let crop = sample_crop(300, 7);
        write_geotiff(&crop, &path).unwrap();

        let tile = crate::tile::TileRaster::open(&path).unwrap();
        assert_eq!(tile.shape(), (300, 7));
        assert_eq!(tile.transform(), crop.transform);
        assert!(tile.nodata().unwrap().is_nan());

        // Rows 255..258 straddle the first strip boundary
        let window = crate::align::PixelWindow {
            col: 2,
            row: 255,
            width: 3,
            height: 3,
        };
        let values = tile.read_window(&window).unwrap();
        for (i, v) in values.iter().enumerate() {
            let (row, col) = (255 + i / 3, 2 + i % 3);
            assert_eq!(*v, (row * 7 + col) as f32 * 0.5);
        }
    }

    #[test]
    fn test_empty_crop_rejected() {
        let crop = Crop {
            raster: Raster::filled((0, 5), f32::NAN),
            transform: PixelTransform::new(0.0, 0.0, RES, -RES),
            epsg: CROP_EPSG,
        };
        let mut buffer = std::io::Cursor::new(Vec::new());
        assert!(matches!(
            write_geotiff_to(&crop, &mut buffer),
            Err(DemError::Precondition(_))
        ));
    }
}
