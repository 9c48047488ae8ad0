//! AOI loading: GeoJSON parsing, CRS detection and reprojection.

use etl_common::{BoundingBox, CrsCode, MultiPolygon, Polygon, Position};
use projection::Transformer;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, instrument, warn};

use crate::error::AoiError;
use crate::naming::slugify;

pub type Result<T> = std::result::Result<T, AoiError>;

/// Intermediate vertices inserted per ring edge before reprojection.
const DENSIFY_SEGMENTS: usize = 8;

/// An AOI in its declared CRS and in the job's target CRS.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AoiGeometry {
    pub name: String,
    /// Lower-case token used in output file names
    pub slug: String,
    pub source_crs: CrsCode,
    pub source: MultiPolygon,
    /// Lon/lat copy handed to remote data sources
    pub wgs84: MultiPolygon,
    pub target_crs: CrsCode,
    pub target: MultiPolygon,
    /// Bounding box of `target`
    pub bbox: BoundingBox,
}

/// Load an AOI file and reproject it to `target_crs`.
#[instrument(fields(path = %path.display(), target_crs = %target_crs))]
pub fn load_aoi(path: &Path, target_crs: CrsCode) -> Result<AoiGeometry> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !matches!(ext.as_str(), "geojson" | "json") {
        return Err(AoiError::UnsupportedFormat(path.display().to_string()));
    }

    let text = std::fs::read_to_string(path).map_err(|e| AoiError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "aoi".to_string());

    parse_aoi(&text, &name, target_crs)
}

/// Parse GeoJSON text and reproject it to `target_crs`.
pub fn parse_aoi(text: &str, name: &str, target_crs: CrsCode) -> Result<AoiGeometry> {
    let doc: Value = serde_json::from_str(text).map_err(|e| AoiError::Parse(e.to_string()))?;

    let declared = declared_crs(&doc)?;
    let mut polygons = Vec::new();
    collect_polygons(&doc, &mut polygons)?;
    let source = MultiPolygon::new(polygons);

    source.validate().map_err(|e| AoiError::InvalidGeometry {
        stage: "source",
        reason: e.to_string(),
    })?;

    let source_crs = match declared {
        Some(crs) => crs,
        None if looks_geographic(&source) => {
            warn!(aoi = %name, "AOI declares no CRS; assuming WGS84 lon/lat");
            CrsCode::Epsg4326
        }
        None => return Err(AoiError::MissingCrs),
    };

    let target = reproject_geometry(&source, source_crs, target_crs)?;
    target.validate().map_err(|e| AoiError::InvalidGeometry {
        stage: "reprojected",
        reason: e.to_string(),
    })?;

    let bbox = target
        .bbox()
        .filter(BoundingBox::is_valid)
        .ok_or_else(|| AoiError::InvalidGeometry {
            stage: "reprojected",
            reason: "degenerate bounding box".to_string(),
        })?;

    let wgs84 = reproject_geometry(&source, source_crs, CrsCode::Epsg4326)?;

    debug!(
        aoi = %name,
        source_crs = %source_crs,
        polygons = target.polygons().len(),
        min_x = bbox.min_x,
        min_y = bbox.min_y,
        max_x = bbox.max_x,
        max_y = bbox.max_y,
        "AOI loaded"
    );

    Ok(AoiGeometry {
        name: name.to_string(),
        slug: slugify(name),
        source_crs,
        source,
        wgs84,
        target_crs,
        target,
        bbox,
    })
}

/// Densify ring edges, then transform every vertex.
///
/// The identity transform returns the geometry unchanged.
pub fn reproject_geometry(geometry: &MultiPolygon, from: CrsCode, to: CrsCode) -> Result<MultiPolygon> {
    let transformer = Transformer::new(from, to);
    if transformer.is_identity() {
        return Ok(geometry.clone());
    }

    geometry
        .densify(DENSIFY_SEGMENTS)
        .try_map(|x, y| transformer.transform(x, y))
        .map_err(|e| AoiError::Projection {
            from: from.to_string(),
            to: to.to_string(),
            reason: e.to_string(),
        })
}

fn declared_crs(doc: &Value) -> Result<Option<CrsCode>> {
    let Some(name) = doc
        .get("crs")
        .and_then(|crs| crs.get("properties"))
        .and_then(|props| props.get("name"))
    else {
        return Ok(None);
    };

    let name = name
        .as_str()
        .ok_or_else(|| AoiError::Parse("crs.properties.name must be a string".to_string()))?;
    CrsCode::parse(name)
        .map(Some)
        .map_err(|_| AoiError::UnsupportedCrs(name.to_string()))
}

/// Walk FeatureCollection, Feature, GeometryCollection, Polygon and
/// MultiPolygon objects. Other geometry types are skipped.
fn collect_polygons(node: &Value, out: &mut Vec<Polygon>) -> Result<()> {
    let kind = node.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "FeatureCollection" => {
            let features = node
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| AoiError::Parse("FeatureCollection without features".to_string()))?;
            for feature in features {
                collect_polygons(feature, out)?;
            }
        }
        "Feature" => {
            if let Some(geometry) = node.get("geometry").filter(|g| !g.is_null()) {
                collect_polygons(geometry, out)?;
            }
        }
        "GeometryCollection" => {
            for geometry in node.get("geometries").and_then(Value::as_array).into_iter().flatten() {
                collect_polygons(geometry, out)?;
            }
        }
        "Polygon" => out.push(parse_polygon(coordinates(node)?)?),
        "MultiPolygon" => {
            let polys = coordinates(node)?
                .as_array()
                .ok_or_else(|| AoiError::Parse("MultiPolygon coordinates must be an array".to_string()))?;
            for poly in polys {
                out.push(parse_polygon(poly)?);
            }
        }
        "" => return Err(AoiError::Parse("object without a type member".to_string())),
        other => debug!(geometry_type = other, "Skipping non-polygon geometry"),
    }
    Ok(())
}

fn coordinates(node: &Value) -> Result<&Value> {
    node.get("coordinates")
        .ok_or_else(|| AoiError::Parse("geometry without coordinates".to_string()))
}

fn parse_polygon(value: &Value) -> Result<Polygon> {
    let rings = value
        .as_array()
        .ok_or_else(|| AoiError::Parse("polygon coordinates must be an array of rings".to_string()))?;
    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings
        .next()
        .transpose()?
        .ok_or_else(|| AoiError::Parse("polygon without an exterior ring".to_string()))?;
    let holes = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, holes))
}

fn parse_ring(value: &Value) -> Result<Vec<Position>> {
    let positions = value
        .as_array()
        .ok_or_else(|| AoiError::Parse("ring must be an array of positions".to_string()))?;
    positions
        .iter()
        .map(|p| {
            let coords = p.as_array().filter(|c| c.len() >= 2);
            match coords.map(|c| (c[0].as_f64(), c[1].as_f64())) {
                Some((Some(x), Some(y))) => Ok((x, y)),
                _ => Err(AoiError::Parse(format!("invalid position {}", p))),
            }
        })
        .collect()
}

fn looks_geographic(geometry: &MultiPolygon) -> bool {
    geometry
        .polygons()
        .iter()
        .flat_map(|p| p.rings())
        .flatten()
        .all(|(x, y)| (-180.0..=180.0).contains(x) && (-90.0..=90.0).contains(y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::aoi;

    #[test]
    fn test_infers_wgs84() {
        let geom = parse_aoi(aoi::FIELD_A_WGS84, "Field A", CrsCode::Epsg4326).unwrap();
        assert_eq!(geom.source_crs, CrsCode::Epsg4326);
        assert_eq!(geom.slug, "field_a");
        assert_eq!(geom.target, geom.source);
    }

    #[test]
    fn test_projected_without_crs_fails() {
        assert_eq!(
            parse_aoi(aoi::PROJECTED_NO_CRS, "x", CrsCode::Epsg3035).unwrap_err(),
            AoiError::MissingCrs
        );
    }

    #[test]
    fn test_bowtie_rejected() {
        let err = parse_aoi(aoi::BOWTIE_WGS84, "x", CrsCode::Epsg3035).unwrap_err();
        assert!(matches!(err, AoiError::InvalidGeometry { stage: "source", .. }));
    }

    #[test]
    fn test_empty_collection_rejected() {
        let err = parse_aoi(aoi::EMPTY_COLLECTION, "x", CrsCode::Epsg3035).unwrap_err();
        assert!(matches!(err, AoiError::InvalidGeometry { .. }));
    }

    #[test]
    fn test_unsupported_crs_member() {
        let text = r#"{"type":"Polygon","crs":{"type":"name","properties":{"name":"EPSG:2154"}},
            "coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#;
        assert_eq!(
            parse_aoi(text, "x", CrsCode::Epsg3035).unwrap_err(),
            AoiError::UnsupportedCrs("EPSG:2154".into())
        );
    }

    #[test]
    fn test_holes_are_parsed() {
        let text = r#"{"type":"Polygon","coordinates":[
            [[0,0],[10,0],[10,10],[0,10],[0,0]],
            [[2,2],[4,2],[4,4],[2,4],[2,2]]]}"#;
        let geom = parse_aoi(text, "x", CrsCode::Epsg4326).unwrap();
        assert_eq!(geom.source.polygons()[0].holes.len(), 1);
        assert!(!geom.source.contains(3.0, 3.0));
    }

    #[test]
    fn test_rejects_other_extensions() {
        let err = load_aoi(Path::new("aoi.shp"), CrsCode::Epsg3035).unwrap_err();
        assert!(matches!(err, AoiError::UnsupportedFormat(_)));
    }
}
