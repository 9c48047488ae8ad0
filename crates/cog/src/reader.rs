//! GeoTIFF decoding into a [`RasterArtifact`].
//!
//! Pixels are decoded chunk by chunk (tiles or strips), so reading a small
//! window of a country-scale raster only touches the chunks under it.

use etl_common::{BoundingBox, CrsCode};
use raster::{Band, DataType, GeoTransform, RasterArtifact};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, instrument};

use crate::error::{CogError, Result};
use crate::geokeys;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

/// Fallback sentinel for files without a `GDAL_NODATA` tag.
const DEFAULT_NODATA: f32 = -9999.0;

type TiffFile = Decoder<BufReader<File>>;

/// Georeferencing of a GeoTIFF, read from its tags only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTiffMeta {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: CrsCode,
    pub nodata: f32,
}

impl GeoTiffMeta {
    pub fn bbox(&self) -> BoundingBox {
        self.transform.bbox(self.width, self.height)
    }

    /// Pixel window covering `bbox` (in the file's CRS), clamped to the image.
    pub fn window(&self, bbox: &BoundingBox) -> Option<PixelWindow> {
        let (c0, r0) = self.transform.world_to_pixel(bbox.min_x, bbox.max_y);
        let (c1, r1) = self.transform.world_to_pixel(bbox.max_x, bbox.min_y);

        let col = c0.floor().max(0.0) as usize;
        let row = r0.floor().max(0.0) as usize;
        let col_end = (c1.ceil().max(0.0) as usize).min(self.width);
        let row_end = (r1.ceil().max(0.0) as usize).min(self.height);

        (col < col_end && row < row_end).then(|| PixelWindow {
            col,
            row,
            width: col_end - col,
            height: row_end - row,
        })
    }

    fn full(&self) -> PixelWindow {
        PixelWindow {
            col: 0,
            row: 0,
            width: self.width,
            height: self.height,
        }
    }
}

/// Rectangle of pixels, top-left anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col: usize,
    pub row: usize,
    pub width: usize,
    pub height: usize,
}

/// Read the georeferencing tags without decoding any pixels.
#[instrument(skip(path), fields(path = %path.display()))]
pub fn read_geotiff_meta(path: &Path) -> Result<GeoTiffMeta> {
    let mut decoder = open(path)?;
    read_meta(&mut decoder)
}

/// Read the full-resolution image of a GeoTIFF.
///
/// Bands are named `band_1`, `band_2`, ... in sample order. The file must
/// carry a north-up ModelPixelScale/ModelTiepoint pair and an EPSG code in
/// its GeoKey directory.
#[instrument(skip(path), fields(path = %path.display()))]
pub fn read_geotiff(path: &Path) -> Result<RasterArtifact> {
    let mut decoder = open(path)?;
    let meta = read_meta(&mut decoder)?;
    read_window(&mut decoder, &meta, meta.full())
}

/// Read only the pixels under `bbox` (in the file's CRS).
///
/// Returns `None` when `bbox` misses the image.
#[instrument(skip(path, bbox), fields(path = %path.display()))]
pub fn read_geotiff_window(path: &Path, bbox: &BoundingBox) -> Result<Option<RasterArtifact>> {
    let mut decoder = open(path)?;
    let meta = read_meta(&mut decoder)?;
    match meta.window(bbox) {
        Some(window) => read_window(&mut decoder, &meta, window).map(Some),
        None => Ok(None),
    }
}

fn open(path: &Path) -> Result<TiffFile> {
    let file = File::open(path)?;
    Ok(Decoder::new(BufReader::new(file))?.with_limits(Limits::default()))
}

fn read_meta(decoder: &mut TiffFile) -> Result<GeoTiffMeta> {
    let (width, height) = decoder.dimensions()?;

    let scale = decoder
        .find_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE))?
        .map(|v| v.into_f64_vec())
        .transpose()?
        .ok_or_else(|| CogError::Unsupported("missing ModelPixelScale tag".into()))?;
    let tiepoint = decoder
        .find_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT))?
        .map(|v| v.into_f64_vec())
        .transpose()?
        .ok_or_else(|| CogError::Unsupported("missing ModelTiepoint tag".into()))?;
    let transform = geotransform(&scale, &tiepoint)?;

    let keys = decoder
        .find_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY))?
        .map(|v| v.into_u16_vec())
        .transpose()?
        .unwrap_or_default();
    let epsg = geokeys::epsg_from_directory(&keys)
        .ok_or_else(|| CogError::Unsupported("no EPSG code in GeoKey directory".into()))?;
    let crs = CrsCode::from_epsg(epsg).ok_or_else(|| CogError::Unsupported(format!("EPSG:{}", epsg)))?;

    let nodata = decoder
        .find_tag(Tag::from_u16_exhaustive(GDAL_NODATA))?
        .map(|v| v.into_string())
        .transpose()?
        .and_then(|s| parse_nodata(&s))
        .unwrap_or(DEFAULT_NODATA);

    let planar = decoder
        .find_tag(Tag::PlanarConfiguration)?
        .map(|v| v.into_u16())
        .transpose()?
        .unwrap_or(1);
    if planar != 1 {
        return Err(CogError::Unsupported("band-separate planar configuration".into()));
    }

    Ok(GeoTiffMeta {
        width: width as usize,
        height: height as usize,
        transform,
        crs,
        nodata,
    })
}

/// Decode the chunks overlapping `window` and copy their pixels out.
fn read_window(decoder: &mut TiffFile, meta: &GeoTiffMeta, window: PixelWindow) -> Result<RasterArtifact> {
    if window.width == 0 || window.height == 0 {
        return Err(CogError::Malformed(format!("empty {}x{} image", meta.width, meta.height)));
    }

    let (chunk_w, chunk_h) = decoder.chunk_dimensions();
    let (chunk_w, chunk_h) = (chunk_w as usize, chunk_h as usize);
    if chunk_w == 0 || chunk_h == 0 {
        return Err(CogError::Malformed("zero-sized chunks".into()));
    }
    let chunks_across = meta.width.div_ceil(chunk_w);

    let col_end = window.col + window.width;
    let row_end = window.row + window.height;
    let mut bands: Vec<Vec<f32>> = Vec::new();
    let mut data_type = None;

    for chunk_row in window.row / chunk_h..=(row_end - 1) / chunk_h {
        for chunk_col in window.col / chunk_w..=(col_end - 1) / chunk_w {
            let index = (chunk_row * chunks_across + chunk_col) as u32;
            let (data_w, data_h) = decoder.chunk_data_dimensions(index);
            let (data_w, data_h) = (data_w as usize, data_h as usize);
            let (samples, chunk_type) = to_samples(decoder.read_chunk(index)?)?;

            let pixels = data_w * data_h;
            if pixels == 0 || samples.len() % pixels != 0 {
                return Err(CogError::Malformed(format!(
                    "chunk {} holds {} samples for {}x{} pixels",
                    index,
                    samples.len(),
                    data_w,
                    data_h
                )));
            }
            let band_count = samples.len() / pixels;
            if bands.is_empty() {
                bands = vec![vec![meta.nodata; window.width * window.height]; band_count];
                data_type = Some(chunk_type);
            } else if bands.len() != band_count {
                return Err(CogError::Malformed(format!("chunk {} changes the band count", index)));
            }

            let x0 = chunk_col * chunk_w;
            let y0 = chunk_row * chunk_h;
            let cols = x0.max(window.col)..(x0 + data_w).min(col_end);
            for y in y0.max(window.row)..(y0 + data_h).min(row_end) {
                for x in cols.clone() {
                    let src = ((y - y0) * data_w + (x - x0)) * band_count;
                    let dst = (y - window.row) * window.width + (x - window.col);
                    for (b, band) in bands.iter_mut().enumerate() {
                        band[dst] = samples[src + b];
                    }
                }
            }
        }
    }

    let data_type = data_type.ok_or_else(|| CogError::Malformed("no chunks decoded".into()))?;
    let band_count = bands.len();
    let bands = bands
        .into_iter()
        .enumerate()
        .map(|(i, data)| Band::new(format!("band_{}", i + 1), data))
        .collect();

    let (origin_x, origin_y) = meta.transform.pixel_to_world(window.col as f64, window.row as f64);
    let transform = GeoTransform::new(
        origin_x,
        origin_y,
        meta.transform.pixel_width,
        meta.transform.pixel_height,
    );

    debug!(
        col = window.col,
        row = window.row,
        width = window.width,
        height = window.height,
        band_count,
        crs = %meta.crs,
        "Decoded GeoTIFF window"
    );

    Ok(RasterArtifact::new(bands, window.width, window.height, transform, meta.crs, meta.nodata)?
        .with_data_type(data_type))
}

fn to_samples(result: DecodingResult) -> Result<(Vec<f32>, DataType)> {
    Ok(match result {
        DecodingResult::U8(v) => (to_f32(v), DataType::UInt8),
        DecodingResult::U16(v) => (to_f32(v), DataType::UInt16),
        DecodingResult::U32(v) => (v.into_iter().map(|x| x as f32).collect(), DataType::UInt32),
        DecodingResult::I8(v) => (to_f32(v), DataType::Int16),
        DecodingResult::I16(v) => (to_f32(v), DataType::Int16),
        DecodingResult::I32(v) => (v.into_iter().map(|x| x as f32).collect(), DataType::Int32),
        DecodingResult::F32(v) => (v, DataType::Float32),
        DecodingResult::F64(v) => (v.into_iter().map(|x| x as f32).collect(), DataType::Float64),
        _ => return Err(CogError::Unsupported("64-bit integer samples".into())),
    })
}

fn to_f32<T: Into<f32>>(values: Vec<T>) -> Vec<f32> {
    values.into_iter().map(Into::into).collect()
}

/// Derive the affine transform from scale and tiepoint tags.
///
/// The tiepoint may reference any raster position, not only the corner.
fn geotransform(scale: &[f64], tiepoint: &[f64]) -> Result<GeoTransform> {
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(CogError::Malformed("short georeferencing tags".into()));
    }
    let (sx, sy) = (scale[0], scale[1]);
    if !(sx > 0.0 && sy > 0.0) {
        return Err(CogError::Unsupported(format!(
            "non north-up pixel scale ({}, {})",
            sx, sy
        )));
    }
    let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
    Ok(GeoTransform::new(x - i * sx, y + j * sy, sx, sy))
}

fn parse_nodata(text: &str) -> Option<f32> {
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    match text.to_ascii_lowercase().as_str() {
        "nan" => Some(f32::NAN),
        _ => text.parse::<f32>().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(width: usize, height: usize) -> GeoTiffMeta {
        GeoTiffMeta {
            width,
            height,
            transform: GeoTransform::new(1000.0, 2000.0, 10.0, 10.0),
            crs: CrsCode::Epsg3035,
            nodata: -9999.0,
        }
    }

    #[test]
    fn test_geotransform_corner_tiepoint() {
        let t = geotransform(&[10.0, 10.0, 0.0], &[0.0, 0.0, 0.0, 500.0, 900.0, 0.0]).unwrap();
        assert_eq!(t, GeoTransform::new(500.0, 900.0, 10.0, 10.0));
    }

    #[test]
    fn test_geotransform_offset_tiepoint() {
        let t = geotransform(&[2.0, 3.0, 0.0], &[5.0, 4.0, 0.0, 100.0, 50.0, 0.0]).unwrap();
        assert_eq!(t.origin_x, 90.0);
        assert_eq!(t.origin_y, 62.0);
    }

    #[test]
    fn test_geotransform_rejects_flipped() {
        assert!(geotransform(&[10.0, -10.0, 0.0], &[0.0; 6]).is_err());
    }

    #[test]
    fn test_parse_nodata() {
        assert_eq!(parse_nodata("-999\0"), Some(-999.0));
        assert_eq!(parse_nodata(" -9999 "), Some(-9999.0));
        assert!(parse_nodata("nan").unwrap().is_nan());
        assert_eq!(parse_nodata("n/a"), None);
    }

    #[test]
    fn test_window_rounds_outwards_and_clamps() {
        let m = meta(100, 50);
        let w = m.window(&BoundingBox::new(1015.0, 1800.0, 1041.0, 1995.0)).unwrap();
        assert_eq!(
            w,
            PixelWindow {
                col: 1,
                row: 0,
                width: 4,
                height: 20
            }
        );

        let w = m.window(&BoundingBox::new(0.0, 0.0, 1_000_000.0, 1_000_000.0)).unwrap();
        assert_eq!(w, m.full());
    }

    #[test]
    fn test_window_outside_image() {
        let m = meta(100, 50);
        assert!(m.window(&BoundingBox::new(5000.0, 5000.0, 6000.0, 6000.0)).is_none());
        // Touching the right edge only
        assert!(m.window(&BoundingBox::new(2000.0, 1600.0, 2100.0, 1700.0)).is_none());
    }
}
