//! Cloud-Optimized GeoTIFF encoding and GeoTIFF decoding.
//!
//! The encoder writes classic little-endian TIFF with:
//! - internal square tiles and DEFLATE compression
//! - overview IFDs computed directly from the full-resolution grid
//! - every IFD ahead of the tile data, smallest overview's tiles first
//! - GeoTIFF keys for the EPSG code and a `GDAL_NODATA` tag
//!
//! Decoding goes through the `tiff` crate so arbitrary GeoTIFFs can be read
//! back, including files this crate did not write. Header-only and windowed
//! reads decode nothing outside the requested pixels' chunks.

pub mod error;
pub mod geokeys;
pub mod layout;
pub mod reader;
pub mod writer;

pub use error::{CogError, Result};
pub use layout::{inspect_layout, CogLayout, IfdSummary};
pub use reader::{read_geotiff, read_geotiff_meta, read_geotiff_window, GeoTiffMeta, PixelWindow};
pub use writer::{encode_cog, overview_factors, write_cog, CogOptions};
