//! Lambert Azimuthal Equal Area, ellipsoidal form (EPSG method 9820).
//!
//! Used by ETRS89 / LAEA Europe (EPSG:3035), the grid of the pan-European
//! land-cover products. Formulas follow IOGP Guidance Note 7-2, section 3.5.

use std::f64::consts::FRAC_PI_2;

/// GRS80 semi-major axis (meters).
const GRS80_A: f64 = 6_378_137.0;
/// GRS80 flattening.
const GRS80_F: f64 = 1.0 / 298.257_222_101;

/// Lambert Azimuthal Equal Area projection parameters.
#[derive(Debug, Clone)]
pub struct LambertAzimuthalEqualArea {
    /// Longitude of natural origin (radians)
    lon0: f64,
    /// Latitude of natural origin (radians)
    lat0: f64,
    false_easting: f64,
    false_northing: f64,
    e: f64,
    e2: f64,
    qp: f64,
    beta0: f64,
    rq: f64,
    d: f64,
}

impl LambertAzimuthalEqualArea {
    /// Create a projection on the GRS80 ellipsoid.
    pub fn new(lat0_deg: f64, lon0_deg: f64, false_easting: f64, false_northing: f64) -> Self {
        let a = GRS80_A;
        let e2 = 2.0 * GRS80_F - GRS80_F * GRS80_F;
        let e = e2.sqrt();
        let lat0 = lat0_deg.to_radians();

        let qp = authalic_q(FRAC_PI_2, e, e2);
        let q0 = authalic_q(lat0, e, e2);
        let beta0 = (q0 / qp).asin();
        let rq = a * (qp / 2.0).sqrt();
        let d = a * (lat0.cos() / (1.0 - e2 * lat0.sin().powi(2)).sqrt()) / (rq * beta0.cos());

        Self {
            lon0: lon0_deg.to_radians(),
            lat0,
            false_easting,
            false_northing,
            e,
            e2,
            qp,
            beta0,
            rq,
            d,
        }
    }

    /// ETRS89 / LAEA Europe (EPSG:3035).
    pub fn etrs89_europe() -> Self {
        Self::new(52.0, 10.0, 4_321_000.0, 3_210_000.0)
    }

    /// Convert (lon, lat) in degrees to (easting, northing) in meters.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let lat = lat_deg.to_radians();
        let dlon = lon_deg.to_radians() - self.lon0;

        let q = authalic_q(lat, self.e, self.e2);
        let beta = (q / self.qp).clamp(-1.0, 1.0).asin();

        let b = self.rq
            * (2.0
                / (1.0
                    + self.beta0.sin() * beta.sin()
                    + self.beta0.cos() * beta.cos() * dlon.cos()))
            .sqrt();

        let easting = self.false_easting + self.d * b * beta.cos() * dlon.sin();
        let northing = self.false_northing
            + (b / self.d)
                * (self.beta0.cos() * beta.sin() - self.beta0.sin() * beta.cos() * dlon.cos());

        (easting, northing)
    }

    /// Convert (easting, northing) in meters to (lon, lat) in degrees.
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let x = easting - self.false_easting;
        let y = northing - self.false_northing;

        let rho = ((x / self.d).powi(2) + (self.d * y).powi(2)).sqrt();
        if rho < 1e-10 {
            return (self.lon0.to_degrees(), self.lat0.to_degrees());
        }

        let c = 2.0 * (rho / (2.0 * self.rq)).clamp(-1.0, 1.0).asin();
        let beta_prime = (c.cos() * self.beta0.sin() + (self.d * y * c.sin() * self.beta0.cos()) / rho)
            .clamp(-1.0, 1.0)
            .asin();

        let lon = self.lon0
            + (x * c.sin()).atan2(
                self.d * rho * self.beta0.cos() * c.cos()
                    - self.d * self.d * y * self.beta0.sin() * c.sin(),
            );

        let e4 = self.e2 * self.e2;
        let e6 = e4 * self.e2;
        let lat = beta_prime
            + (self.e2 / 3.0 + 31.0 * e4 / 180.0 + 517.0 * e6 / 5040.0) * (2.0 * beta_prime).sin()
            + (23.0 * e4 / 360.0 + 251.0 * e6 / 3780.0) * (4.0 * beta_prime).sin()
            + (761.0 * e6 / 45360.0) * (6.0 * beta_prime).sin();

        (lon.to_degrees(), lat.to_degrees())
    }
}

/// Authalic latitude helper q(φ).
fn authalic_q(lat: f64, e: f64, e2: f64) -> f64 {
    let sin_lat = lat.sin();
    (1.0 - e2)
        * (sin_lat / (1.0 - e2 * sin_lat * sin_lat)
            - (1.0 / (2.0 * e)) * ((1.0 - e * sin_lat) / (1.0 + e * sin_lat)).ln())
}
