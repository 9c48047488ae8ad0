//! Cloud-Optimized GeoTIFF encoder.
//!
//! Builds the whole file in memory in two passes: first every tile of every
//! level is compressed, then the IFD blocks are sized so tile offsets can be
//! assigned before anything is serialized.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use rayon::prelude::*;
use raster::{downsample, DataType, DownsampleMethod, RasterArtifact};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::error::{CogError, Result};
use crate::geokeys;

// TIFF tags
const NEW_SUBFILE_TYPE: u16 = 254;
const IMAGE_WIDTH: u16 = 256;
const IMAGE_LENGTH: u16 = 257;
const BITS_PER_SAMPLE: u16 = 258;
const COMPRESSION: u16 = 259;
const PHOTOMETRIC: u16 = 262;
const SAMPLES_PER_PIXEL: u16 = 277;
const PLANAR_CONFIGURATION: u16 = 284;
const TILE_WIDTH: u16 = 322;
const TILE_LENGTH: u16 = 323;
const TILE_OFFSETS: u16 = 324;
const TILE_BYTE_COUNTS: u16 = 325;
const EXTRA_SAMPLES: u16 = 338;
const SAMPLE_FORMAT: u16 = 339;
const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

// TIFF field types
const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_DOUBLE: u16 = 12;

const COMPRESSION_DEFLATE: u16 = 8;
const PHOTOMETRIC_MIN_IS_BLACK: u16 = 1;

/// COG encoder options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CogOptions {
    /// Tile edge in pixels; must be a positive multiple of 16.
    pub tile_size: usize,
    /// zlib level 0-9.
    pub compression_level: u32,
    /// How overview pixels are combined from the full-resolution grid.
    pub overview_method: DownsampleMethod,
}

impl Default for CogOptions {
    fn default() -> Self {
        Self {
            tile_size: 512,
            compression_level: 6,
            overview_method: DownsampleMethod::Mean,
        }
    }
}

impl CogOptions {
    fn validate(&self) -> Result<()> {
        if self.tile_size == 0 || self.tile_size % 16 != 0 {
            return Err(CogError::InvalidOptions(format!(
                "tile_size must be a positive multiple of 16, got {}",
                self.tile_size
            )));
        }
        if self.compression_level > 9 {
            return Err(CogError::InvalidOptions(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }
}

/// Overview decimation factors for a grid: 2, 4, 8 ... up to and including
/// the first level that fits in a single tile.
pub fn overview_factors(width: usize, height: usize, tile_size: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut factor = 1usize;
    while width.div_ceil(factor) > tile_size || height.div_ceil(factor) > tile_size {
        factor *= 2;
        factors.push(factor);
    }
    factors
}

/// One resolution level with its compressed tiles in row-major order.
struct Level {
    width: usize,
    height: usize,
    is_overview: bool,
    tiles: Vec<Vec<u8>>,
}

/// Encode a raster as a COG byte stream.
pub fn encode_cog(raster: &RasterArtifact, options: &CogOptions) -> Result<Vec<u8>> {
    options.validate()?;

    let factors = overview_factors(raster.width, raster.height, options.tile_size);

    let mut levels = Vec::with_capacity(factors.len() + 1);
    let full: Vec<&[f32]> = raster.bands.iter().map(|b| b.data.as_slice()).collect();
    levels.push(encode_level(raster, &full, raster.width, raster.height, false, options)?);

    for factor in &factors {
        let mut width = 0;
        let mut height = 0;
        let bands: Vec<Vec<f32>> = raster
            .bands
            .iter()
            .map(|b| {
                let (data, w, h) = downsample(
                    &b.data,
                    raster.width,
                    raster.height,
                    *factor,
                    options.overview_method,
                    raster.nodata,
                );
                width = w;
                height = h;
                data
            })
            .collect();
        let refs: Vec<&[f32]> = bands.iter().map(Vec::as_slice).collect();
        levels.push(encode_level(raster, &refs, width, height, true, options)?);
    }

    let ifds: Vec<Ifd> = levels
        .iter()
        .map(|level| build_ifd(raster, level, options))
        .collect();

    // Pass 1: sizes. IFD blocks sit back to back after the 8-byte header.
    let mut ifd_offsets = Vec::with_capacity(ifds.len());
    let mut cursor = 8u64;
    for ifd in &ifds {
        ifd_offsets.push(cursor);
        cursor += ifd.block_size() as u64;
    }

    // Tile data: smallest overview first, full resolution last
    let mut tile_offsets: Vec<Vec<u32>> = vec![Vec::new(); levels.len()];
    for (idx, level) in levels.iter().enumerate().rev() {
        for tile in &level.tiles {
            tile_offsets[idx].push(to_u32(cursor)?);
            cursor += tile.len() as u64;
        }
    }
    let total = to_u32(cursor)? as usize;

    // Pass 2: serialize
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&(ifd_offsets[0] as u32).to_le_bytes());

    for (idx, ifd) in ifds.into_iter().enumerate() {
        let byte_counts: Vec<u32> = levels[idx]
            .tiles
            .iter()
            .map(|t| t.len() as u32)
            .collect();
        let ifd = ifd
            .with(TILE_OFFSETS, TYPE_LONG, longs(&tile_offsets[idx]))
            .with(TILE_BYTE_COUNTS, TYPE_LONG, longs(&byte_counts));
        let next = ifd_offsets.get(idx + 1).copied().unwrap_or(0) as u32;
        ifd.write(&mut out, ifd_offsets[idx] as u32, next);
    }

    for level in levels.iter().rev() {
        for tile in &level.tiles {
            out.extend_from_slice(tile);
        }
    }

    debug!(
        width = raster.width,
        height = raster.height,
        bands = raster.bands.len(),
        overviews = factors.len(),
        bytes = out.len(),
        "Encoded COG"
    );

    Ok(out)
}

/// Encode `raster` and write it to `path`. Returns the number of bytes written.
///
/// Writes straight to `path`; callers that need atomic replacement write to a
/// temporary name and rename.
pub fn write_cog(raster: &RasterArtifact, path: &Path, options: &CogOptions) -> Result<u64> {
    let bytes = encode_cog(raster, options)?;
    let mut file = fs::File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(bytes.len() as u64)
}

fn to_u32(offset: u64) -> Result<u32> {
    u32::try_from(offset).map_err(|_| CogError::TooLarge(offset))
}

fn encode_level(
    raster: &RasterArtifact,
    bands: &[&[f32]],
    width: usize,
    height: usize,
    is_overview: bool,
    options: &CogOptions,
) -> Result<Level> {
    let ts = options.tile_size;
    let across = width.div_ceil(ts);
    let down = height.div_ceil(ts);
    let level = Compression::new(options.compression_level);

    let tiles = (0..across * down)
        .into_par_iter()
        .map(|t| {
            let tx = (t % across) * ts;
            let ty = (t / across) * ts;
            let raw = interleave_tile(raster, bands, width, height, tx, ty, ts);
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), level);
            encoder.write_all(&raw)?;
            encoder.finish()
        })
        .collect::<std::io::Result<Vec<_>>>()?;

    Ok(Level {
        width,
        height,
        is_overview,
        tiles,
    })
}

/// Pixel-interleaved samples for one tile, padded with nodata past the edges.
fn interleave_tile(
    raster: &RasterArtifact,
    bands: &[&[f32]],
    width: usize,
    height: usize,
    tx: usize,
    ty: usize,
    ts: usize,
) -> Vec<u8> {
    let dt = raster.data_type;
    let mut raw = Vec::with_capacity(ts * ts * bands.len() * dt.size_bytes());
    for row in ty..ty + ts {
        for col in tx..tx + ts {
            for band in bands {
                let v = if row < height && col < width {
                    band[row * width + col]
                } else {
                    raster.nodata
                };
                let v = if v.is_nan() { raster.nodata } else { v };
                push_sample(&mut raw, v, dt);
            }
        }
    }
    raw
}

/// Append one sample in the on-disk representation of `dt`.
///
/// Float to integer `as` casts saturate, so out-of-range values clamp.
#[inline]
fn push_sample(buf: &mut Vec<u8>, v: f32, dt: DataType) {
    match dt {
        DataType::UInt8 => buf.push(v.round() as u8),
        DataType::UInt16 => buf.extend_from_slice(&(v.round() as u16).to_le_bytes()),
        DataType::Int16 => buf.extend_from_slice(&(v.round() as i16).to_le_bytes()),
        DataType::UInt32 => buf.extend_from_slice(&(v.round() as u32).to_le_bytes()),
        DataType::Int32 => buf.extend_from_slice(&(v.round() as i32).to_le_bytes()),
        DataType::Float32 => buf.extend_from_slice(&v.to_le_bytes()),
        DataType::Float64 => buf.extend_from_slice(&(v as f64).to_le_bytes()),
    }
}

fn sample_format(dt: DataType) -> u16 {
    match dt {
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 => 1,
        DataType::Int16 | DataType::Int32 => 2,
        DataType::Float32 | DataType::Float64 => 3,
    }
}

/// GDAL_NODATA text: integers without a fractional part.
fn nodata_text(nodata: f32, dt: DataType) -> String {
    if dt.is_integer() || nodata.fract() == 0.0 {
        format!("{}", nodata as i64)
    } else {
        format!("{}", nodata)
    }
}

fn build_ifd(raster: &RasterArtifact, level: &Level, options: &CogOptions) -> Ifd {
    let dt = raster.data_type;
    let n = raster.bands.len();
    let bits = (dt.size_bytes() * 8) as u16;

    let mut ifd = Ifd::default()
        .with(NEW_SUBFILE_TYPE, TYPE_LONG, longs(&[u32::from(level.is_overview)]))
        .with(IMAGE_WIDTH, TYPE_LONG, longs(&[level.width as u32]))
        .with(IMAGE_LENGTH, TYPE_LONG, longs(&[level.height as u32]))
        .with(BITS_PER_SAMPLE, TYPE_SHORT, shorts(&vec![bits; n]))
        .with(COMPRESSION, TYPE_SHORT, shorts(&[COMPRESSION_DEFLATE]))
        .with(PHOTOMETRIC, TYPE_SHORT, shorts(&[PHOTOMETRIC_MIN_IS_BLACK]))
        .with(SAMPLES_PER_PIXEL, TYPE_SHORT, shorts(&[n as u16]))
        .with(PLANAR_CONFIGURATION, TYPE_SHORT, shorts(&[1]))
        .with(TILE_WIDTH, TYPE_LONG, longs(&[options.tile_size as u32]))
        .with(TILE_LENGTH, TYPE_LONG, longs(&[options.tile_size as u32]))
        .with(SAMPLE_FORMAT, TYPE_SHORT, shorts(&vec![sample_format(dt); n]))
        // Placeholders; real offsets are filled in once the layout is known
        .with(TILE_OFFSETS, TYPE_LONG, longs(&vec![0; level.tiles.len()]))
        .with(TILE_BYTE_COUNTS, TYPE_LONG, longs(&vec![0; level.tiles.len()]));

    if n > 1 {
        ifd = ifd.with(EXTRA_SAMPLES, TYPE_SHORT, shorts(&vec![0; n - 1]));
    }

    if !level.is_overview {
        let t = raster.transform;
        ifd = ifd
            .with(
                MODEL_PIXEL_SCALE,
                TYPE_DOUBLE,
                doubles(&[t.pixel_width, t.pixel_height, 0.0]),
            )
            .with(
                MODEL_TIEPOINT,
                TYPE_DOUBLE,
                doubles(&[0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0]),
            )
            .with(
                GEO_KEY_DIRECTORY,
                TYPE_SHORT,
                shorts(&geokeys::key_directory(raster.crs)),
            );
    }

    let mut text = nodata_text(raster.nodata, dt).into_bytes();
    text.push(0);
    ifd.with(GDAL_NODATA, TYPE_ASCII, Value { count: text.len() as u32, bytes: text })
}

/// Encoded field payload.
struct Value {
    count: u32,
    bytes: Vec<u8>,
}

fn shorts(values: &[u16]) -> Value {
    Value {
        count: values.len() as u32,
        bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

fn longs(values: &[u32]) -> Value {
    Value {
        count: values.len() as u32,
        bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

fn doubles(values: &[f64]) -> Value {
    Value {
        count: values.len() as u32,
        bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

/// An image file directory under construction. Entries are kept sorted by tag.
#[derive(Default)]
struct Ifd {
    entries: Vec<(u16, u16, Value)>,
}

impl Ifd {
    /// Insert or replace the entry for `tag`.
    fn with(mut self, tag: u16, field_type: u16, value: Value) -> Self {
        let pos = self.entries.partition_point(|(t, _, _)| *t < tag);
        match self.entries.get(pos) {
            Some((t, _, _)) if *t == tag => self.entries[pos] = (tag, field_type, value),
            _ => self.entries.insert(pos, (tag, field_type, value)),
        }
        self
    }

    /// Size of the out-of-line area for one payload, word aligned.
    fn external_len(value: &Value) -> usize {
        if value.bytes.len() <= 4 {
            0
        } else {
            value.bytes.len() + value.bytes.len() % 2
        }
    }

    /// Directory plus out-of-line values. Replacing an entry with a payload of
    /// the same length keeps this unchanged.
    fn block_size(&self) -> usize {
        let mut size = 2 + self.entries.len() * 12 + 4;
        size += self
            .entries
            .iter()
            .map(|(_, _, v)| Self::external_len(v))
            .sum::<usize>();
        size
    }

    fn write(&self, out: &mut Vec<u8>, block_offset: u32, next_ifd: u32) {
        let dir_len = 2 + self.entries.len() * 12 + 4;
        let mut external_offset = block_offset as usize + dir_len;
        let mut external = Vec::new();

        out.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        for (tag, field_type, value) in &self.entries {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&field_type.to_le_bytes());
            out.extend_from_slice(&value.count.to_le_bytes());
            if value.bytes.len() <= 4 {
                let mut inline = [0u8; 4];
                inline[..value.bytes.len()].copy_from_slice(&value.bytes);
                out.extend_from_slice(&inline);
            } else {
                out.extend_from_slice(&(external_offset as u32).to_le_bytes());
                external.extend_from_slice(&value.bytes);
                if value.bytes.len() % 2 == 1 {
                    external.push(0);
                }
                external_offset += Self::external_len(value);
            }
        }
        out.extend_from_slice(&next_ifd.to_le_bytes());
        out.extend_from_slice(&external);
    }
}
