//! Point and bounding-box transforms between supported CRS codes.
//!
//! Every pair is routed through WGS84 geographic coordinates. ETRS89 is taken
//! as coincident with WGS84, which holds to well under a meter in Europe.

use etl_common::{BoundingBox, CrsCode};

use crate::error::{ProjectionError, Result};
use crate::laea::LambertAzimuthalEqualArea;
use crate::mercator::WebMercator;
use crate::utm::Utm;

/// A projection between geographic and one CRS, with parameters precomputed.
#[derive(Debug, Clone)]
enum Projector {
    Geographic,
    Mercator(WebMercator),
    Laea(LambertAzimuthalEqualArea),
    Utm(Utm),
}

impl Projector {
    fn for_crs(crs: CrsCode) -> Self {
        match crs {
            CrsCode::Epsg4326 | CrsCode::Epsg4258 => Projector::Geographic,
            CrsCode::Epsg3857 => Projector::Mercator(WebMercator),
            CrsCode::Epsg3035 => Projector::Laea(LambertAzimuthalEqualArea::etrs89_europe()),
            CrsCode::Utm { zone, north } => Projector::Utm(Utm::new(zone, north)),
        }
    }

    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Projector::Geographic => (lon, lat),
            Projector::Mercator(p) => p.forward(lon, lat),
            Projector::Laea(p) => p.forward(lon, lat),
            Projector::Utm(p) => p.forward(lon, lat),
        }
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Projector::Geographic => (x, y),
            Projector::Mercator(p) => p.inverse(x, y),
            Projector::Laea(p) => p.inverse(x, y),
            Projector::Utm(p) => p.inverse(x, y),
        }
    }
}

/// Reusable transform from one CRS to another.
///
/// Construct once per raster or geometry; `transform` is cheap enough to call
/// per pixel.
#[derive(Debug, Clone)]
pub struct Transformer {
    from: CrsCode,
    to: CrsCode,
    source: Projector,
    target: Projector,
}

impl Transformer {
    pub fn new(from: CrsCode, to: CrsCode) -> Self {
        Self {
            from,
            to,
            source: Projector::for_crs(from),
            target: Projector::for_crs(to),
        }
    }

    /// True when source and target are the same CRS and no math is applied.
    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// Transform a single coordinate.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::OutOfDomain {
                crs: self.from,
                x,
                y,
            });
        }
        if self.is_identity() {
            return Ok((x, y));
        }

        let (lon, lat) = self.source.inverse(x, y);
        if !(-90.0..=90.0).contains(&lat) || !lon.is_finite() {
            return Err(ProjectionError::OutOfDomain {
                crs: self.from,
                x,
                y,
            });
        }

        let (tx, ty) = self.target.forward(lon, lat);
        if !tx.is_finite() || !ty.is_finite() {
            return Err(ProjectionError::NonFinite {
                from: self.from,
                to: self.to,
                x,
                y,
            });
        }
        Ok((tx, ty))
    }

    /// Transform a bounding box by sampling `samples_per_edge` points along
    /// each edge and taking the envelope of the results.
    ///
    /// Points that fall outside the projection domain are skipped; the call
    /// fails only when no sample could be transformed.
    pub fn transform_bbox(&self, bbox: &BoundingBox, samples_per_edge: usize) -> Result<BoundingBox> {
        if self.is_identity() {
            return Ok(*bbox);
        }

        let n = samples_per_edge.max(1);
        let mut points = Vec::with_capacity(4 * (n + 1));
        for i in 0..=n {
            let t = i as f64 / n as f64;
            let x = bbox.min_x + t * bbox.width();
            let y = bbox.min_y + t * bbox.height();
            points.push((x, bbox.min_y));
            points.push((x, bbox.max_y));
            points.push((bbox.min_x, y));
            points.push((bbox.max_x, y));
        }

        let projected = points
            .into_iter()
            .filter_map(|(x, y)| self.transform(x, y).ok());

        BoundingBox::from_points(projected).ok_or(ProjectionError::EmptyBbox {
            from: self.from,
            to: self.to,
        })
    }
}

/// Convert a coordinate in `crs` to WGS84 (lon, lat) degrees.
pub fn to_geographic(crs: CrsCode, x: f64, y: f64) -> Result<(f64, f64)> {
    Transformer::new(crs, CrsCode::Epsg4326).transform(x, y)
}

/// Convert WGS84 (lon, lat) degrees to a coordinate in `crs`.
pub fn from_geographic(crs: CrsCode, lon: f64, lat: f64) -> Result<(f64, f64)> {
    Transformer::new(CrsCode::Epsg4326, crs).transform(lon, lat)
}

/// Transform a single point between two CRS codes.
pub fn transform_point(from: CrsCode, to: CrsCode, x: f64, y: f64) -> Result<(f64, f64)> {
    Transformer::new(from, to).transform(x, y)
}

/// Transform a bounding box between two CRS codes (21 samples per edge).
pub fn transform_bbox(from: CrsCode, to: CrsCode, bbox: &BoundingBox) -> Result<BoundingBox> {
    Transformer::new(from, to).transform_bbox(bbox, 20)
}
