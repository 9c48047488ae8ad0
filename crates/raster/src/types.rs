//! Core raster types.

use etl_common::{BoundingBox, CrsCode};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RasterError, Result};

/// Logical sample type of a raster when it is written out.
///
/// Samples are always held as `f32` in memory; the data type decides how they
/// are rounded and encoded on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    UInt8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    #[default]
    Float32,
    Float64,
}

impl DataType {
    /// Parse from string (case-insensitive), e.g. "int32" or "Float32".
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "uint8" | "byte" => Some(Self::UInt8),
            "uint16" => Some(Self::UInt16),
            "int16" => Some(Self::Int16),
            "uint32" => Some(Self::UInt32),
            "int32" => Some(Self::Int32),
            "float32" => Some(Self::Float32),
            "float64" => Some(Self::Float64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::Int16 => "int16",
            Self::UInt32 => "uint32",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Bytes per sample.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::UInt8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Self::Int16 | Self::Int32 | Self::Float32 | Self::Float64
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resampling kernel used by warp and resample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingMethod {
    /// Nearest neighbor (preserves exact values).
    Nearest,
    /// Bilinear interpolation (smooth, slight value changes).
    #[default]
    Bilinear,
    /// Catmull-Rom bicubic (smoothest, more compute).
    Cubic,
}

impl ResamplingMethod {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "nearest" | "near" => Some(Self::Nearest),
            "bilinear" => Some(Self::Bilinear),
            "cubic" | "bicubic" => Some(Self::Cubic),
            _ => None,
        }
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => write!(f, "nearest"),
            Self::Bilinear => write!(f, "bilinear"),
            Self::Cubic => write!(f, "cubic"),
        }
    }
}

/// North-up affine transform from pixel to world coordinates.
///
/// `(origin_x, origin_y)` is the outer corner of the top-left pixel. Pixel
/// sizes are positive; rows advance southwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// Grid covering `bbox` at the given pixel size, rounded outwards.
    pub fn covering(bbox: &BoundingBox, pixel_width: f64, pixel_height: f64) -> (Self, usize, usize) {
        let width = ((bbox.width() / pixel_width) - 1e-9).ceil().max(1.0) as usize;
        let height = ((bbox.height() / pixel_height) - 1e-9).ceil().max(1.0) as usize;
        (
            Self::new(bbox.min_x, bbox.max_y, pixel_width, pixel_height),
            width,
            height,
        )
    }

    /// World coordinate of a fractional pixel position (0.5 = pixel center).
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y - row * self.pixel_height,
        )
    }

    /// Fractional pixel position of a world coordinate.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (self.origin_y - y) / self.pixel_height,
        )
    }

    /// World extent of a `width` x `height` grid.
    pub fn bbox(&self, width: usize, height: usize) -> BoundingBox {
        BoundingBox::new(
            self.origin_x,
            self.origin_y - height as f64 * self.pixel_height,
            self.origin_x + width as f64 * self.pixel_width,
            self.origin_y,
        )
    }
}

/// A single named band of samples in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub name: String,
    pub data: Vec<f32>,
}

impl Band {
    pub fn new(name: impl Into<String>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// A georeferenced multi-band raster held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterArtifact {
    pub bands: Vec<Band>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: CrsCode,
    pub data_type: DataType,
    /// Sentinel stored for missing samples. NaN samples are also treated as missing.
    pub nodata: f32,
    /// Number of source observations composited into this raster.
    pub observations: u32,
}

impl RasterArtifact {
    /// Build an artifact, checking that every band matches the dimensions.
    pub fn new(
        bands: Vec<Band>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: CrsCode,
        nodata: f32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RasterError::empty(format!("{}x{} raster", width, height)));
        }
        if bands.is_empty() {
            return Err(RasterError::empty("raster has no bands"));
        }
        let expected = width * height;
        for band in &bands {
            if band.data.len() != expected {
                return Err(RasterError::DimensionMismatch {
                    band: band.name.clone(),
                    expected,
                    actual: band.data.len(),
                });
            }
        }
        Ok(Self {
            bands,
            width,
            height,
            transform,
            crs,
            data_type: DataType::Float32,
            nodata,
            observations: 0,
        })
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_observations(mut self, observations: u32) -> Self {
        self.observations = observations;
        self
    }

    /// Copy of this artifact's metadata with new bands and grid.
    pub fn with_grid(
        &self,
        bands: Vec<Band>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: CrsCode,
    ) -> Result<Self> {
        Ok(Self::new(bands, width, height, transform, crs, self.nodata)?
            .with_data_type(self.data_type)
            .with_observations(self.observations))
    }

    pub fn bbox(&self) -> BoundingBox {
        self.transform.bbox(self.width, self.height)
    }

    /// Pixel size as (x, y) in CRS units.
    pub fn resolution(&self) -> (f64, f64) {
        (self.transform.pixel_width, self.transform.pixel_height)
    }

    pub fn band(&self, name: &str) -> Result<&Band> {
        self.bands
            .iter()
            .find(|b| b.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| RasterError::MissingBand(name.to_string()))
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    /// True if the sample is missing (NaN or equal to the nodata sentinel).
    #[inline]
    pub fn is_nodata(&self, value: f32) -> bool {
        value.is_nan() || value == self.nodata
    }

    /// Number of valid samples in the first band.
    pub fn valid_count(&self) -> usize {
        self.bands
            .first()
            .map(|b| b.data.iter().filter(|v| !self.is_nodata(**v)).count())
            .unwrap_or(0)
    }
}
