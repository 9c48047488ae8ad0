//! AOI loading and reprojection against on-disk fixtures.

use etl_common::CrsCode;
use pipeline::aoi::reproject_geometry;
use pipeline::{load_aoi, AoiError};
use test_utils::{aoi, assert_envelope_approx_eq, scratch_dir, write_fixture};

#[test]
fn test_reproject_to_own_crs_is_noop() {
    let dir = scratch_dir();
    let path = write_fixture(dir.path(), "field_b.geojson", aoi::FIELD_B_EPSG3035);

    let geom = load_aoi(&path, CrsCode::Epsg3035).unwrap();
    assert_eq!(geom.source_crs, CrsCode::Epsg3035);
    assert_eq!(geom.target, geom.source);
    assert_eq!(geom.bbox.min_x, 4_550_000.0);
    assert_eq!(geom.bbox.max_y, 3_271_000.0);

    let again = reproject_geometry(&geom.target, CrsCode::Epsg3035, CrsCode::Epsg3035).unwrap();
    assert_eq!(again, geom.target);
}

#[test]
fn test_wgs84_round_trip_stays_put() {
    let dir = scratch_dir();
    let path = write_fixture(dir.path(), "Field A.geojson", aoi::FIELD_A_WGS84);

    let geom = load_aoi(&path, CrsCode::Epsg3035).unwrap();
    assert_eq!(geom.name, "Field A");
    assert_eq!(geom.slug, "field_a");
    assert_eq!(geom.source_crs, CrsCode::Epsg4326);

    // Roughly 1.36 km by 1.11 km
    assert!((1_200.0..1_500.0).contains(&geom.bbox.width()));
    assert!((1_000.0..1_250.0).contains(&geom.bbox.height()));

    let back = reproject_geometry(&geom.target, CrsCode::Epsg3035, CrsCode::Epsg4326).unwrap();
    let bbox = back.bbox().unwrap();
    assert_envelope_approx_eq!(
        (bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y),
        (13.300, 52.500, 13.320, 52.510),
        1e-6
    );
}

#[test]
fn test_multipolygon_to_utm() {
    let dir = scratch_dir();
    let path = write_fixture(dir.path(), "two_fields.json", aoi::TWO_FIELDS_CRS84);

    let geom = load_aoi(&path, CrsCode::Utm { zone: 32, north: true }).unwrap();
    assert_eq!(geom.target.polygons().len(), 2);
    assert_eq!(geom.wgs84, geom.source);
    assert!(geom.bbox.min_x > 400_000.0 && geom.bbox.max_x < 600_000.0);
}

#[test]
fn test_missing_file() {
    let dir = scratch_dir();
    let err = load_aoi(&dir.path().join("nope.geojson"), CrsCode::Epsg3035).unwrap_err();
    assert!(matches!(err, AoiError::Read { .. }));
}
