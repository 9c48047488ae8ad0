//! Web Mercator projection (EPSG:3857).
//!
//! Spherical Mercator on the WGS84 semi-major axis, as used by web map tiles.

use std::f64::consts::PI;

use crate::WGS84_A;

/// Latitude limit where the projected square world ends.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Web Mercator projection.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl WebMercator {
    /// Convert (lon, lat) in degrees to (x, y) in meters.
    ///
    /// Latitudes beyond ±85.0511° are clamped to the projection limit.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let lat = lat_deg.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let x = WGS84_A * lon_deg.to_radians();
        let y = WGS84_A * (PI / 4.0 + lat / 2.0).tan().ln();
        (x, y)
    }

    /// Convert (x, y) in meters to (lon, lat) in degrees.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let lon = (x / WGS84_A).to_degrees();
        let lat = (2.0 * (y / WGS84_A).exp().atan() - PI / 2.0).to_degrees();
        (lon, lat)
    }
}
