//! Common test fixtures for spatial ETL tests.
//!
//! This module provides pre-defined AOIs, configuration documents and helpers
//! to put them on disk.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// AOI GeoJSON documents.
pub mod aoi {
    /// Small field near Berlin in lon/lat, no `crs` member (WGS84 is inferred).
    pub const FIELD_A_WGS84: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "properties": { "name": "Field A" },
      "geometry": {
        "type": "Polygon",
        "coordinates": [[
          [13.300, 52.500], [13.320, 52.500], [13.320, 52.510],
          [13.300, 52.510], [13.300, 52.500]
        ]]
      }
    }
  ]
}"#;

    /// A 1 km square in ETRS89-LAEA declared through the legacy `crs` member.
    pub const FIELD_B_EPSG3035: &str = r#"{
  "type": "FeatureCollection",
  "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::3035" } },
  "features": [
    {
      "type": "Feature",
      "properties": {},
      "geometry": {
        "type": "Polygon",
        "coordinates": [[
          [4550000.0, 3270000.0], [4551000.0, 3270000.0], [4551000.0, 3271000.0],
          [4550000.0, 3271000.0], [4550000.0, 3270000.0]
        ]]
      }
    }
  ]
}"#;

    /// Projected coordinates with no CRS declared; cannot be inferred.
    pub const PROJECTED_NO_CRS: &str = r#"{
  "type": "Polygon",
  "coordinates": [[
    [4550000.0, 3270000.0], [4551000.0, 3270000.0], [4551000.0, 3271000.0],
    [4550000.0, 3271000.0], [4550000.0, 3270000.0]
  ]]
}"#;

    /// Self-intersecting "bow tie" ring.
    pub const BOWTIE_WGS84: &str = r#"{
  "type": "Feature",
  "properties": {},
  "geometry": {
    "type": "Polygon",
    "coordinates": [[
      [10.0, 50.0], [10.1, 50.1], [10.1, 50.0], [10.0, 50.1], [10.0, 50.0]
    ]]
  }
}"#;

    /// Two disjoint fields as one MultiPolygon, declared as OGC:CRS84.
    pub const TWO_FIELDS_CRS84: &str = r#"{
  "type": "Feature",
  "crs": { "type": "name", "properties": { "name": "OGC:CRS84" } },
  "properties": {},
  "geometry": {
    "type": "MultiPolygon",
    "coordinates": [
      [[[9.00, 48.00], [9.01, 48.00], [9.01, 48.01], [9.00, 48.01], [9.00, 48.00]]],
      [[[9.05, 48.05], [9.06, 48.05], [9.06, 48.06], [9.05, 48.06], [9.05, 48.05]]]
    ]
  }
}"#;

    /// Valid JSON with no polygon geometry.
    pub const EMPTY_COLLECTION: &str = r#"{ "type": "FeatureCollection", "features": [] }"#;
}

/// Configuration documents.
pub mod config {
    /// Base configuration with the project-wide defaults.
    pub const BASE_YAML: &str = r#"
defaults:
  crs: EPSG:3035
  resolution_m: 10
  resampling: bilinear
  allowed_crs: [EPSG:3035, EPSG:4326, EPSG:32633]
  workers: 2
  storage:
    kind: local_cog
    output_dir: data/outputs
  extraction:
    max_retries: 5
    initial_backoff_ms: 500
    max_backoff_ms: 30000
"#;

    /// Job selecting two indices for one field and season.
    pub const JOB_YAML: &str = r#"
job:
  name: field-a-summer
  aoi: aois/field_a.geojson
  year: 2023
  season: summer
  variables: [ndvi, ndmi]
"#;
}

/// Create a fresh scratch directory removed when the guard is dropped.
///
/// # Panics
///
/// Panics if the temp directory cannot be created (test-only helper).
pub fn scratch_dir() -> TempDir {
    tempfile::tempdir().expect("failed to create scratch dir")
}

/// Write `contents` to `dir/name`, creating parent directories.
///
/// # Panics
///
/// Panics on I/O failure (test-only helper).
pub fn write_fixture(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create fixture dir");
    }
    fs::write(&path, contents).expect("failed to write fixture");
    path
}
