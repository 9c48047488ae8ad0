//! Polygon geometry used for AOIs and raster masks.
//!
//! Rings are stored as closed coordinate sequences (first point repeated at the
//! end), matching GeoJSON linear rings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bbox::BoundingBox;

/// A single (x, y) position.
pub type Position = (f64, f64);

/// Topology and validity problems found in a polygon set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("geometry contains no polygons")]
    Empty,

    #[error("geometry contains a non-finite coordinate")]
    NonFinite,

    #[error("ring {ring} of polygon {polygon} has {points} positions; at least 4 are required")]
    TooFewPositions {
        polygon: usize,
        ring: usize,
        points: usize,
    },

    #[error("ring {ring} of polygon {polygon} is not closed")]
    UnclosedRing { polygon: usize, ring: usize },

    #[error("polygon {polygon} has zero area")]
    ZeroArea { polygon: usize },

    #[error("ring {ring} of polygon {polygon} intersects itself")]
    SelfIntersection { polygon: usize, ring: usize },
}

/// A polygon with one exterior ring and optional holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<Position>,
    pub holes: Vec<Vec<Position>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Position>, holes: Vec<Vec<Position>>) -> Self {
        Self { exterior, holes }
    }

    /// Axis-aligned rectangle as a closed counter-clockwise ring.
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Self::new(
            vec![
                (bbox.min_x, bbox.min_y),
                (bbox.max_x, bbox.min_y),
                (bbox.max_x, bbox.max_y),
                (bbox.min_x, bbox.max_y),
                (bbox.min_x, bbox.min_y),
            ],
            Vec::new(),
        )
    }

    /// Iterate over exterior then hole rings.
    pub fn rings(&self) -> impl Iterator<Item = &Vec<Position>> {
        std::iter::once(&self.exterior).chain(self.holes.iter())
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.exterior.iter().copied())
    }

    /// Area of the exterior minus the holes.
    pub fn area(&self) -> f64 {
        let holes: f64 = self.holes.iter().map(|h| ring_signed_area(h).abs()).sum();
        (ring_signed_area(&self.exterior).abs() - holes).max(0.0)
    }

    /// Even-odd point-in-polygon test honoring holes.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        ring_contains(&self.exterior, x, y) && !self.holes.iter().any(|h| ring_contains(h, x, y))
    }

    /// Insert `segments - 1` evenly spaced points on every ring edge.
    pub fn densify(&self, segments: usize) -> Polygon {
        Polygon {
            exterior: densify_ring(&self.exterior, segments),
            holes: self.holes.iter().map(|h| densify_ring(h, segments)).collect(),
        }
    }

    /// Apply a fallible coordinate mapping to every position.
    pub fn try_map<E, F>(&self, mut f: F) -> Result<Polygon, E>
    where
        F: FnMut(f64, f64) -> Result<Position, E>,
    {
        let mut map_ring = |ring: &Vec<Position>| -> Result<Vec<Position>, E> {
            ring.iter().map(|&(x, y)| f(x, y)).collect()
        };
        let exterior = map_ring(&self.exterior)?;
        let holes = self
            .holes
            .iter()
            .map(&mut map_ring)
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Polygon { exterior, holes })
    }
}

/// A set of polygons treated as their union.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiPolygon(pub Vec<Polygon>);

impl MultiPolygon {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self(polygons)
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.0
            .iter()
            .filter_map(Polygon::bbox)
            .reduce(|a, b| a.union(&b))
    }

    pub fn area(&self) -> f64 {
        self.0.iter().map(Polygon::area).sum()
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.0.iter().any(|p| p.contains(x, y))
    }

    pub fn densify(&self, segments: usize) -> MultiPolygon {
        MultiPolygon(self.0.iter().map(|p| p.densify(segments)).collect())
    }

    pub fn try_map<E, F>(&self, mut f: F) -> Result<MultiPolygon, E>
    where
        F: FnMut(f64, f64) -> Result<Position, E>,
    {
        self.0
            .iter()
            .map(|p| p.try_map(&mut f))
            .collect::<Result<Vec<_>, E>>()
            .map(MultiPolygon)
    }

    /// Check that the geometry is usable as an AOI.
    ///
    /// Requires at least one polygon, finite coordinates, closed rings of at
    /// least four positions, non-zero area and no self-intersecting ring.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.0.is_empty() {
            return Err(GeometryError::Empty);
        }

        for (pi, polygon) in self.0.iter().enumerate() {
            for (ri, ring) in polygon.rings().enumerate() {
                if ring.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
                    return Err(GeometryError::NonFinite);
                }
                if ring.len() < 4 {
                    return Err(GeometryError::TooFewPositions {
                        polygon: pi,
                        ring: ri,
                        points: ring.len(),
                    });
                }
                if ring.first() != ring.last() {
                    return Err(GeometryError::UnclosedRing {
                        polygon: pi,
                        ring: ri,
                    });
                }
                if ring_self_intersects(ring) {
                    return Err(GeometryError::SelfIntersection {
                        polygon: pi,
                        ring: ri,
                    });
                }
            }
            if polygon.area() <= 0.0 {
                return Err(GeometryError::ZeroArea { polygon: pi });
            }
        }
        Ok(())
    }
}

/// Shoelace signed area; positive for counter-clockwise rings.
pub fn ring_signed_area(ring: &[Position]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for w in ring.windows(2) {
        sum += w[0].0 * w[1].1 - w[1].0 * w[0].1;
    }
    // Ring may be given unclosed
    if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
        if first != last {
            sum += last.0 * first.1 - first.0 * last.1;
        }
    }
    sum / 2.0
}

fn ring_contains(ring: &[Position], x: f64, y: f64) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn densify_ring(ring: &[Position], segments: usize) -> Vec<Position> {
    if segments <= 1 || ring.len() < 2 {
        return ring.to_vec();
    }
    let mut out = Vec::with_capacity((ring.len() - 1) * segments + 1);
    for w in ring.windows(2) {
        let (x0, y0) = w[0];
        let (x1, y1) = w[1];
        for s in 0..segments {
            let t = s as f64 / segments as f64;
            out.push((x0 + t * (x1 - x0), y0 + t * (y1 - y0)));
        }
    }
    if let Some(&last) = ring.last() {
        out.push(last);
    }
    out
}

/// True if any two non-adjacent edges of a closed ring cross or touch.
pub fn ring_self_intersects(ring: &[Position]) -> bool {
    let edges = ring.len().saturating_sub(1);
    if edges < 4 {
        return false;
    }
    for i in 0..edges {
        let (a, b) = (ring[i], ring[i + 1]);
        for j in (i + 2)..edges {
            // First and last edges share the closing vertex
            if i == 0 && j == edges - 1 {
                continue;
            }
            let (c, d) = (ring[j], ring[j + 1]);
            if segments_intersect(a, b, c, d) {
                return true;
            }
        }
    }
    false
}

fn orientation(p: Position, q: Position, r: Position) -> f64 {
    (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
}

fn on_segment(p: Position, q: Position, r: Position) -> bool {
    r.0 >= p.0.min(q.0) && r.0 <= p.0.max(q.0) && r.1 >= p.1.min(q.1) && r.1 <= p.1.max(q.1)
}

fn segments_intersect(a: Position, b: Position, c: Position, d: Position) -> bool {
    let d1 = orientation(c, d, a);
    let d2 = orientation(c, d, b);
    let d3 = orientation(a, b, c);
    let d4 = orientation(a, b, d);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(c, d, a))
        || (d2 == 0.0 && on_segment(c, d, b))
        || (d3 == 0.0 && on_segment(a, b, c))
        || (d4 == 0.0 && on_segment(a, b, d))
}
