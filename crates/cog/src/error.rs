//! Error types for COG encoding and GeoTIFF decoding.

use thiserror::Error;

/// Errors that can occur while reading or writing GeoTIFFs.
#[derive(Error, Debug)]
pub enum CogError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by the TIFF decoder.
    #[error("TIFF decode error: {0}")]
    Decode(String),

    /// Encoder options are out of range.
    #[error("invalid COG options: {0}")]
    InvalidOptions(String),

    /// The output would exceed the 4 GiB classic TIFF limit.
    #[error("encoded size {0} bytes exceeds the classic TIFF limit")]
    TooLarge(u64),

    /// The file uses a layout or sample type that is not supported.
    #[error("unsupported GeoTIFF: {0}")]
    Unsupported(String),

    /// Structural problem in a TIFF byte stream.
    #[error("malformed TIFF: {0}")]
    Malformed(String),

    /// Raster construction failed.
    #[error("raster error: {0}")]
    Raster(#[from] raster::RasterError),
}

impl From<tiff::TiffError> for CogError {
    fn from(err: tiff::TiffError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type for COG operations.
pub type Result<T> = std::result::Result<T, CogError>;
