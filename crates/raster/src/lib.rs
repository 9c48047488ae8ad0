//! Raster artifacts and the pure transforms applied to them.
//!
//! Every operation takes an artifact by reference and returns a new one, so a
//! failed step never leaves a half-modified raster behind.

pub mod clip;
pub mod derive;
pub mod downsample;
pub mod error;
pub mod interpolation;
pub mod mosaic;
pub mod recode;
pub mod types;
pub mod warp;

pub use clip::clip;
pub use derive::IndexFormula;
pub use downsample::{downsample, DownsampleMethod};
pub use error::{RasterError, Result};
pub use mosaic::mosaic;
pub use recode::{cast, recode};
pub use types::{Band, DataType, GeoTransform, RasterArtifact, ResamplingMethod};
pub use warp::{reproject, resample, warp, TargetGrid, METERS_PER_DEGREE};
