//! Coordinate reference system transformations.
//!
//! Implements the map projections the pipeline needs from scratch without
//! external C dependencies. Every projected CRS is reached through WGS84
//! geographic coordinates.

pub mod error;
pub mod laea;
pub mod mercator;
pub mod transform;
pub mod utm;

pub use error::{ProjectionError, Result};
pub use laea::LambertAzimuthalEqualArea;
pub use mercator::WebMercator;
pub use transform::{from_geographic, to_geographic, transform_bbox, transform_point, Transformer};
pub use utm::Utm;

/// WGS84 semi-major axis (meters).
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
