//! Encode rasters as COGs and read them back through the `tiff` decoder.

use cog::{
    encode_cog, inspect_layout, read_geotiff, read_geotiff_meta, read_geotiff_window, write_cog, CogOptions,
};
use etl_common::{BoundingBox, CrsCode};
use raster::{cast, Band, DataType, DownsampleMethod, GeoTransform, RasterArtifact};
use test_utils::{
    create_class_grid, create_grid_with_gaps, create_reflectance_grid, create_test_grid, scratch_dir,
};

fn small_tiles() -> CogOptions {
    CogOptions {
        tile_size: 16,
        ..Default::default()
    }
}

fn laea(bands: Vec<Band>, width: usize, height: usize, nodata: f32) -> RasterArtifact {
    RasterArtifact::new(
        bands,
        width,
        height,
        GeoTransform::new(4_550_000.0, 3_271_000.0, 10.0, 10.0),
        CrsCode::Epsg3035,
        nodata,
    )
    .unwrap()
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_float32_roundtrip_preserves_values_and_georeferencing() {
    let dir = scratch_dir();
    let path = dir.path().join("ndvi.tif");
    let data = create_grid_with_gaps(37, 21, 0.42, -9999.0, &[(0, 0), (36, 20)]);
    let src = laea(vec![Band::new("ndvi", data.clone())], 37, 21, -9999.0);

    let size = write_cog(&src, &path, &small_tiles()).unwrap();
    assert_eq!(size, std::fs::metadata(&path).unwrap().len());

    let back = read_geotiff(&path).unwrap();
    assert_eq!((back.width, back.height), (37, 21));
    assert_eq!(back.crs, CrsCode::Epsg3035);
    assert_eq!(back.transform, src.transform);
    assert_eq!(back.nodata, -9999.0);
    assert_eq!(back.data_type, DataType::Float32);
    assert_eq!(back.bands[0].data, data);
}

#[test]
fn test_int32_categorical_roundtrip() {
    let dir = scratch_dir();
    let path = dir.path().join("landcover.tif");
    let classes = [1.0, 2.0, 5.0, -999.0];
    let src = laea(
        vec![Band::new("class", create_class_grid(20, 20, &classes))],
        20,
        20,
        -999.0,
    );
    let src = cast(&src, DataType::Int32).unwrap();

    write_cog(&src, &path, &small_tiles()).unwrap();
    let back = read_geotiff(&path).unwrap();

    assert_eq!(back.data_type, DataType::Int32);
    assert_eq!(back.nodata, -999.0);
    assert_eq!(back.bands[0].data, src.bands[0].data);
}

#[test]
fn test_multiband_roundtrip_keeps_band_order() {
    let dir = scratch_dir();
    let path = dir.path().join("bands.tif");
    let b1 = create_reflectance_grid(18, 18, 0.1, 0.2);
    let b2 = create_reflectance_grid(18, 18, 0.5, 0.1);
    let src = laea(
        vec![Band::new("B4", b1.clone()), Band::new("B8", b2.clone())],
        18,
        18,
        -9999.0,
    );

    write_cog(&src, &path, &small_tiles()).unwrap();
    let back = read_geotiff(&path).unwrap();

    assert_eq!(back.band_names(), vec!["band_1", "band_2"]);
    assert_eq!(back.bands[0].data, b1);
    assert_eq!(back.bands[1].data, b2);
}

#[test]
fn test_geographic_crs_roundtrip() {
    let dir = scratch_dir();
    let path = dir.path().join("wgs84.tif");
    let src = RasterArtifact::new(
        vec![Band::new("v", vec![1.0; 16])],
        4,
        4,
        GeoTransform::new(13.3, 52.51, 0.0001, 0.0001),
        CrsCode::Epsg4326,
        -9999.0,
    )
    .unwrap();

    write_cog(&src, &path, &CogOptions::default()).unwrap();
    let back = read_geotiff(&path).unwrap();
    assert_eq!(back.crs, CrsCode::Epsg4326);
    assert_eq!(back.transform, src.transform);
}

// ============================================================================
// Header and windowed reads
// ============================================================================

#[test]
fn test_meta_matches_full_read() {
    let dir = scratch_dir();
    let path = dir.path().join("meta.tif");
    let src = laea(vec![Band::new("v", create_test_grid(37, 21))], 37, 21, -9999.0);
    write_cog(&src, &path, &small_tiles()).unwrap();

    let meta = read_geotiff_meta(&path).unwrap();
    assert_eq!((meta.width, meta.height), (37, 21));
    assert_eq!(meta.transform, src.transform);
    assert_eq!(meta.crs, CrsCode::Epsg3035);
    assert_eq!(meta.nodata, -9999.0);
    assert_eq!(meta.bbox(), src.bbox());
}

#[test]
fn test_window_across_tile_boundaries() {
    let dir = scratch_dir();
    let path = dir.path().join("window.tif");
    let b1 = create_test_grid(37, 21);
    let b2: Vec<f32> = b1.iter().map(|v| v * 2.0).collect();
    let src = laea(
        vec![Band::new("a", b1.clone()), Band::new("b", b2.clone())],
        37,
        21,
        -9999.0,
    );
    write_cog(&src, &path, &small_tiles()).unwrap();

    // Columns 10..20 and rows 12..18 straddle the 16 px tile edges
    let bbox = BoundingBox::new(4_550_100.0, 3_270_820.0, 4_550_200.0, 3_270_880.0);
    let window = read_geotiff_window(&path, &bbox).unwrap().unwrap();

    assert_eq!((window.width, window.height), (10, 6));
    assert_eq!(window.transform, GeoTransform::new(4_550_100.0, 3_270_880.0, 10.0, 10.0));
    for row in 0..6 {
        for col in 0..10 {
            let expected = (row + 12) * 37 + (col + 10);
            assert_eq!(window.bands[0].data[row * 10 + col], b1[expected]);
            assert_eq!(window.bands[1].data[row * 10 + col], b2[expected]);
        }
    }
}

#[test]
fn test_window_decodes_only_covering_tiles() {
    let dir = scratch_dir();
    let path = dir.path().join("damaged.tif");
    let data = create_test_grid(32, 32);
    let src = laea(vec![Band::new("v", data.clone())], 32, 32, -9999.0);

    // Wreck the bottom-right tile of the full-resolution image
    let mut bytes = encode_cog(&src, &small_tiles()).unwrap();
    let layout = inspect_layout(&bytes).unwrap();
    let start = layout.ifds[0].tile_offsets[3] as usize;
    let len = layout.ifds[0].tile_byte_counts[3] as usize;
    bytes[start..start + len].fill(0xFF);
    std::fs::write(&path, &bytes).unwrap();

    assert!(read_geotiff(&path).is_err());

    let top_left = BoundingBox::new(4_550_000.0, 3_270_840.0, 4_550_160.0, 3_271_000.0);
    let window = read_geotiff_window(&path, &top_left).unwrap().unwrap();
    assert_eq!((window.width, window.height), (16, 16));
    assert_eq!(window.bands[0].data[17], data[32 + 1]);
}

#[test]
fn test_window_outside_image_is_none() {
    let dir = scratch_dir();
    let path = dir.path().join("far.tif");
    let src = laea(vec![Band::new("v", vec![1.0; 64])], 8, 8, -9999.0);
    write_cog(&src, &path, &small_tiles()).unwrap();

    let far = BoundingBox::new(4_000_000.0, 3_000_000.0, 4_000_100.0, 3_000_100.0);
    assert!(read_geotiff_window(&path, &far).unwrap().is_none());
}

// ============================================================================
// Layout
// ============================================================================

#[test]
fn test_overviews_and_ifds_precede_data() {
    let data = create_reflectance_grid(100, 70, 0.0, 1.0);
    let src = laea(vec![Band::new("v", data)], 100, 70, -9999.0);

    let bytes = encode_cog(&src, &small_tiles()).unwrap();
    let layout = inspect_layout(&bytes).unwrap();

    // 100 -> 50 -> 25 -> 13 (fits in a 16 px tile)
    let widths: Vec<u32> = layout.ifds.iter().map(|i| i.width).collect();
    assert_eq!(widths, vec![100, 50, 25, 13]);
    assert_eq!(layout.overview_count(), 3);
    assert!(layout.is_cloud_optimized());

    // 7 x 5 tiles at full resolution
    assert_eq!(layout.ifds[0].tile_offsets.len(), 35);
    assert_eq!(layout.ifds[3].tile_offsets.len(), 1);
}

#[test]
fn test_small_raster_has_no_overviews() {
    let src = laea(vec![Band::new("v", vec![3.0; 64])], 8, 8, -9999.0);
    let bytes = encode_cog(&src, &small_tiles()).unwrap();
    let layout = inspect_layout(&bytes).unwrap();
    assert_eq!(layout.ifds.len(), 1);
    assert!(layout.is_cloud_optimized());
}

#[test]
fn test_encoding_is_deterministic() {
    let data = create_reflectance_grid(50, 50, 0.1, 0.5);
    let src = laea(vec![Band::new("v", data)], 50, 50, -9999.0);
    let options = CogOptions {
        tile_size: 16,
        compression_level: 9,
        overview_method: DownsampleMethod::Nearest,
    };
    assert_eq!(
        encode_cog(&src, &options).unwrap(),
        encode_cog(&src, &options).unwrap()
    );
}
