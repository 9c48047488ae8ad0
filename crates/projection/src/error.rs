//! Error types for coordinate transformations.

use etl_common::CrsCode;
use thiserror::Error;

/// Errors that can occur while transforming coordinates.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    /// Input coordinate is outside the domain of the projection.
    #[error("coordinate ({x}, {y}) is outside the valid domain of {crs}")]
    OutOfDomain { crs: CrsCode, x: f64, y: f64 },

    /// The transform produced NaN or infinite output.
    #[error("transform from {from} to {to} produced a non-finite coordinate for ({x}, {y})")]
    NonFinite {
        from: CrsCode,
        to: CrsCode,
        x: f64,
        y: f64,
    },

    /// Bounding box transform had no valid sample points.
    #[error("bounding box could not be transformed from {from} to {to}")]
    EmptyBbox { from: CrsCode, to: CrsCode },
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
