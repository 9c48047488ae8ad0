//! Common types and utilities shared across the spatial ETL crates.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod geometry;
pub mod time;

pub use bbox::BoundingBox;
pub use crs::CrsCode;
pub use error::{ParseError, ParseResult};
pub use geometry::{GeometryError, MultiPolygon, Polygon, Position};
pub use time::{Season, TimeWindow};
