//! Error types for raster operations.

use thiserror::Error;

/// Errors that can occur while building or transforming rasters.
#[derive(Error, Debug)]
pub enum RasterError {
    /// Band length does not match width * height.
    #[error("band '{band}' has {actual} samples, expected {expected}")]
    DimensionMismatch {
        band: String,
        expected: usize,
        actual: usize,
    },

    /// A referenced band is not present.
    #[error("band '{0}' not found in raster")]
    MissingBand(String),

    /// The raster has zero width, zero height or no bands.
    #[error("empty raster: {0}")]
    Empty(String),

    /// The requested window does not overlap the raster.
    #[error("requested region {requested} does not overlap raster extent {extent}")]
    NoOverlap { requested: String, extent: String },

    /// An operation parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Coordinate transform failure.
    #[error("projection error: {0}")]
    Projection(#[from] projection::ProjectionError),
}

impl RasterError {
    /// Create an InvalidParameter error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create an Empty error.
    pub fn empty(msg: impl Into<String>) -> Self {
        Self::Empty(msg.into())
    }
}

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
