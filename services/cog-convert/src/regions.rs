//! Per-region post-processing of finished rasters.
//!
//! [`merge_by_region`] joins tiles whose file names share a region token into
//! one COG per region. [`mask_by_regions`] clips one raster to each region
//! file in a directory.

use cog::{read_geotiff, read_geotiff_meta, read_geotiff_window, GeoTiffMeta};
use pipeline::load_aoi;
use raster::{cast, clip, mosaic, recode, RasterError, ResamplingMethod};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument};
use walkdir::WalkDir;

use crate::convert::{is_tiff, write_output, ConvertError, Result};

/// Options for [`merge_by_region`].
#[derive(Debug, Clone)]
pub struct MergeSettings {
    /// Text before the region token; files without it are ignored
    pub prefix: String,
    /// Any of these characters ends the region token
    pub separators: String,
    pub suffix: String,
    pub resampling: ResamplingMethod,
    /// Treat this value as missing in every tile and the output
    pub src_nodata: Option<f32>,
    pub skip_single: bool,
    pub overwrite: bool,
    pub dry_run: bool,
    pub tile_size: usize,
    pub compression_level: u32,
}

/// Options for [`mask_by_regions`].
#[derive(Debug, Clone)]
pub struct MaskSettings {
    pub suffix: String,
    pub dst_nodata: Option<f32>,
    pub skip_existing: bool,
    pub tile_size: usize,
    pub compression_level: u32,
}

/// What happened to one region.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionOutcome {
    Merged { output: PathBuf, tiles: usize },
    Copied(PathBuf),
    Masked(PathBuf),
    /// Dry run only
    Planned { output: PathBuf, tiles: usize },
    Skipped(&'static str),
}

/// Outcome of a whole region batch, keyed by region name.
#[derive(Debug, Default)]
pub struct RegionReport {
    pub done: Vec<(String, RegionOutcome)>,
    pub failed: Vec<(String, ConvertError)>,
}

impl RegionReport {
    fn record(&mut self, region: String, result: Result<RegionOutcome>) {
        match result {
            Ok(outcome) => {
                info!(region = %region, outcome = ?outcome, "Region done");
                self.done.push((region, outcome));
            }
            Err(e) => {
                error!(region = %region, error = %e, "Region failed");
                self.failed.push((region, e));
            }
        }
    }
}

// ============================================================================
// Merge by region token
// ============================================================================

/// Region token of a file stem: the text after `prefix` up to the first
/// separator character.
///
/// `meta_canopy_height_alps-0000-0001` with prefix `meta_canopy_height_`
/// gives `alps`.
pub fn region_token<'a>(stem: &'a str, prefix: &str, separators: &str) -> Option<&'a str> {
    let rest = stem.strip_prefix(prefix)?;
    let (region, _) = rest.split_once(|c| separators.contains(c))?;
    let region = region.trim();
    (!region.is_empty()).then_some(region)
}

/// GeoTIFF tiles under `input_dir` grouped by region token, each group
/// sorted by path. Nothing inside `output_dir` is considered.
pub fn group_tiles(
    input_dir: &Path,
    output_dir: &Path,
    prefix: &str,
    separators: &str,
) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let walker = WalkDir::new(input_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !entry.path().starts_with(output_dir));

    for entry in walker {
        let entry = entry.map_err(|e| ConvertError::List {
            path: input_dir.display().to_string(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() || !is_tiff(entry.path()) {
            continue;
        }
        let stem = entry
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if let Some(region) = region_token(&stem, prefix, separators) {
            groups.entry(region.to_string()).or_default().push(entry.into_path());
        }
    }

    for tiles in groups.values_mut() {
        tiles.sort();
    }
    Ok(groups)
}

/// Merge every region's tiles into `<prefix><region><suffix>` under
/// `output_dir`, continuing past failed regions.
pub fn merge_by_region(input_dir: &Path, output_dir: &Path, settings: &MergeSettings) -> Result<RegionReport> {
    if !input_dir.is_dir() {
        return Err(ConvertError::List {
            path: input_dir.display().to_string(),
            reason: "not a directory".to_string(),
        });
    }

    let groups = group_tiles(input_dir, output_dir, &settings.prefix, &settings.separators)?;
    info!(regions = groups.len(), input = %input_dir.display(), dry_run = settings.dry_run, "Merging tiles by region");

    if !settings.dry_run {
        std::fs::create_dir_all(output_dir).map_err(|e| ConvertError::List {
            path: output_dir.display().to_string(),
            reason: e.to_string(),
        })?;
    }

    let mut report = RegionReport::default();
    for (region, tiles) in groups {
        let output = output_dir.join(format!("{}{}{}", settings.prefix, region, settings.suffix));
        let result = merge_region(&region, &tiles, &output, settings);
        report.record(region, result);
    }
    Ok(report)
}

#[instrument(skip_all, fields(region = %region, tiles = tiles.len()))]
fn merge_region(region: &str, tiles: &[PathBuf], output: &Path, settings: &MergeSettings) -> Result<RegionOutcome> {
    if output.exists() && !settings.overwrite {
        return Ok(RegionOutcome::Skipped("output exists"));
    }

    if let [single] = tiles {
        if settings.skip_single {
            return Ok(RegionOutcome::Skipped("single tile"));
        }
        if settings.dry_run {
            return Ok(RegionOutcome::Planned {
                output: output.to_path_buf(),
                tiles: 1,
            });
        }
        std::fs::copy(single, output).map_err(|e| ConvertError::Copy {
            path: single.display().to_string(),
            reason: e.to_string(),
        })?;
        return Ok(RegionOutcome::Copied(output.to_path_buf()));
    }

    if settings.dry_run {
        for tile in tiles {
            debug!(tile = %tile.display(), "Would merge");
        }
        return Ok(RegionOutcome::Planned {
            output: output.to_path_buf(),
            tiles: tiles.len(),
        });
    }

    let pieces = tiles
        .iter()
        .map(|path| {
            let mut piece = read_geotiff(path).map_err(|source| ConvertError::Read {
                path: path.display().to_string(),
                source,
            })?;
            if let Some(nodata) = settings.src_nodata {
                piece.nodata = nodata;
            }
            Ok(piece)
        })
        .collect::<Result<Vec<_>>>()?;

    let merged = mosaic(&pieces, settings.resampling).map_err(|source| ConvertError::Mosaic {
        region: region.to_string(),
        source,
    })?;
    write_output(&merged, output, settings.tile_size, settings.compression_level)?;

    Ok(RegionOutcome::Merged {
        output: output.to_path_buf(),
        tiles: tiles.len(),
    })
}

// ============================================================================
// Mask by region files
// ============================================================================

/// `.geojson`/`.json` files directly inside `dir`, sorted by name.
pub fn list_regions(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| ConvertError::List {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let is_geojson = entry
            .path()
            .extension()
            .map(|e| e.eq_ignore_ascii_case("geojson") || e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if entry.file_type().is_file() && is_geojson {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Clip `input` to every region file in `regions_dir`, writing
/// `<region stem><suffix>` under `output_dir`.
pub fn mask_by_regions(
    input: &Path,
    regions_dir: &Path,
    output_dir: &Path,
    settings: &MaskSettings,
) -> Result<RegionReport> {
    let meta = read_geotiff_meta(input).map_err(|source| ConvertError::Read {
        path: input.display().to_string(),
        source,
    })?;
    let regions = list_regions(regions_dir)?;
    info!(
        regions = regions.len(),
        input = %input.display(),
        crs = %meta.crs,
        "Masking raster by regions"
    );

    std::fs::create_dir_all(output_dir).map_err(|e| ConvertError::List {
        path: output_dir.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut report = RegionReport::default();
    for region in regions {
        let name = region
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let output = output_dir.join(format!("{}{}", name, settings.suffix));
        let result = mask_region(input, &meta, &region, &output, settings);
        report.record(name, result);
    }
    Ok(report)
}

#[instrument(skip_all, fields(region = %region.display()))]
fn mask_region(
    input: &Path,
    meta: &GeoTiffMeta,
    region: &Path,
    output: &Path,
    settings: &MaskSettings,
) -> Result<RegionOutcome> {
    if output == input {
        return Err(ConvertError::SameFile(output.display().to_string()));
    }
    if settings.skip_existing && output.exists() {
        return Ok(RegionOutcome::Skipped("output exists"));
    }

    let aoi = load_aoi(region, meta.crs).map_err(|source| ConvertError::Region {
        path: region.display().to_string(),
        source,
    })?;
    let no_overlap = || ConvertError::NoOverlap(region.display().to_string());

    let window = read_geotiff_window(input, &aoi.bbox)
        .map_err(|source| ConvertError::Read {
            path: input.display().to_string(),
            source,
        })?
        .ok_or_else(no_overlap)?;

    let mut masked = match clip(&window, &aoi.target, aoi.target_crs) {
        Ok(clipped) => clipped,
        Err(RasterError::NoOverlap { .. }) => return Err(no_overlap()),
        Err(source) => {
            return Err(ConvertError::Clip {
                path: region.display().to_string(),
                source,
            })
        }
    };

    if let Some(nodata) = settings.dst_nodata {
        masked = recode(&masked, &[], nodata).map_err(|source| ConvertError::Clip {
            path: region.display().to_string(),
            source,
        })?;
        let data_type = masked.data_type;
        masked = cast(&masked, data_type).map_err(|source| ConvertError::Cast { data_type, source })?;
    }
    debug!(width = masked.width, height = masked.height, valid = masked.valid_count(), "Masked");

    write_output(&masked, output, settings.tile_size, settings.compression_level)?;
    Ok(RegionOutcome::Masked(output.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cog::{write_cog, CogOptions};
    use etl_common::CrsCode;
    use raster::{Band, DataType, GeoTransform, RasterArtifact};
    use test_utils::{aoi, create_constant_grid, scratch_dir, write_fixture};

    /// Float32 raster at 10 m in ETRS89-LAEA with its top-left corner at `(x, y)`.
    fn write_raster(path: &Path, x: f64, y: f64, width: usize, height: usize, value: f32, data_type: DataType) {
        let raster = RasterArtifact::new(
            vec![Band::new("b1", create_constant_grid(width, height, value))],
            width,
            height,
            GeoTransform::new(x, y, 10.0, 10.0),
            CrsCode::Epsg3035,
            0.0,
        )
        .unwrap()
        .with_data_type(data_type);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        write_cog(&raster, path, &CogOptions::default()).unwrap();
    }

    fn merge_settings() -> MergeSettings {
        MergeSettings {
            prefix: "ch_".into(),
            separators: "-_".into(),
            suffix: "_merged.tif".into(),
            resampling: ResamplingMethod::Nearest,
            src_nodata: None,
            skip_single: false,
            overwrite: false,
            dry_run: false,
            tile_size: 256,
            compression_level: 6,
        }
    }

    fn mask_settings() -> MaskSettings {
        MaskSettings {
            suffix: "_mask.tif".into(),
            dst_nodata: None,
            skip_existing: false,
            tile_size: 256,
            compression_level: 6,
        }
    }

    // ========================================================================
    // Region tokens and grouping
    // ========================================================================

    #[test]
    fn test_region_token() {
        assert_eq!(
            region_token("meta_canopy_height_alps-0000000000-0000065536", "meta_canopy_height_", "-_"),
            Some("alps")
        );
        assert_eq!(region_token("ch_jura_0001", "ch_", "-_"), Some("jura"));
        assert_eq!(region_token("jura-0001", "", "-"), Some("jura"));
        // Missing prefix, missing separator, empty token
        assert_eq!(region_token("other-0001", "ch_", "-_"), None);
        assert_eq!(region_token("ch_jura", "ch_", "-_"), None);
        assert_eq!(region_token("ch_-0001", "ch_", "-_"), None);
        assert_eq!(region_token("jura-0001", "", ""), None);
    }

    #[test]
    fn test_groups_tiles_recursively_and_skips_output_dir() {
        let dir = scratch_dir();
        for name in [
            "ch_alps-0000-0002.tif",
            "nested/ch_alps-0000-0001.TIF",
            "ch_jura-0000-0000.tiff",
            "other-0000-0000.tif",
            "ch_alps-notes.txt",
            "merged/ch_alps-0000-0003.tif",
        ] {
            write_fixture(dir.path(), name, "");
        }

        let groups = group_tiles(dir.path(), &dir.path().join("merged"), "ch_", "-_").unwrap();

        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["alps", "jura"]);
        assert_eq!(
            groups["alps"],
            vec![dir.path().join("ch_alps-0000-0002.tif"), dir.path().join("nested/ch_alps-0000-0001.TIF")]
        );
        assert_eq!(groups["jura"].len(), 1);
    }

    // ========================================================================
    // Merge
    // ========================================================================

    #[test]
    fn test_merges_copies_and_skips_existing() {
        let dir = scratch_dir();
        let input = dir.path().join("tiles");
        let output = dir.path().join("merged");
        // Two alps tiles overlap in columns 15..20 of the merged grid
        write_raster(&input.join("ch_alps-0000-0000.tif"), 4_550_000.0, 3_271_000.0, 20, 10, 1.0, DataType::Float32);
        write_raster(&input.join("ch_alps-0000-0150.tif"), 4_550_150.0, 3_271_000.0, 20, 10, 2.0, DataType::Float32);
        write_raster(&input.join("ch_jura-0000-0000.tif"), 4_600_000.0, 3_300_000.0, 8, 8, 3.0, DataType::UInt8);
        write_fixture(&output, "ch_tessin_merged.tif", "keep me");
        write_fixture(&input, "ch_tessin-0000-0000.tif", "not read");

        let report = merge_by_region(&input, &output, &merge_settings()).unwrap();
        assert!(report.failed.is_empty(), "{:?}", report.failed);
        assert_eq!(
            report.done,
            vec![
                (
                    "alps".to_string(),
                    RegionOutcome::Merged {
                        output: output.join("ch_alps_merged.tif"),
                        tiles: 2
                    }
                ),
                ("jura".to_string(), RegionOutcome::Copied(output.join("ch_jura_merged.tif"))),
                ("tessin".to_string(), RegionOutcome::Skipped("output exists")),
            ]
        );

        let merged = read_geotiff(&output.join("ch_alps_merged.tif")).unwrap();
        assert_eq!((merged.width, merged.height), (35, 10));
        let row = &merged.bands[0].data[..35];
        assert_eq!(row[0], 1.0);
        assert_eq!(row[17], 1.0);
        assert_eq!(row[34], 2.0);

        assert_eq!(
            std::fs::read(output.join("ch_jura_merged.tif")).unwrap(),
            std::fs::read(input.join("ch_jura-0000-0000.tif")).unwrap()
        );
        assert_eq!(std::fs::read_to_string(output.join("ch_tessin_merged.tif")).unwrap(), "keep me");
    }

    #[test]
    fn test_src_nodata_fills_from_later_tiles() {
        let dir = scratch_dir();
        let input = dir.path().join("tiles");
        write_raster(&input.join("ch_alps-a.tif"), 4_550_000.0, 3_271_000.0, 10, 10, 5.0, DataType::Float32);
        write_raster(&input.join("ch_alps-b.tif"), 4_550_000.0, 3_271_000.0, 10, 10, 2.0, DataType::Float32);

        let settings = MergeSettings {
            src_nodata: Some(5.0),
            ..merge_settings()
        };
        let report = merge_by_region(&input, &dir.path().join("out"), &settings).unwrap();
        assert_eq!(report.done.len(), 1);

        let merged = read_geotiff(&dir.path().join("out/ch_alps_merged.tif")).unwrap();
        assert_eq!(merged.nodata, 5.0);
        assert!(merged.bands[0].data.iter().all(|v| *v == 2.0));
    }

    #[test]
    fn test_dry_run_and_skip_single_write_nothing() {
        let dir = scratch_dir();
        let input = dir.path().join("tiles");
        let output = dir.path().join("merged");
        write_fixture(&input, "ch_alps-1.tif", "");
        write_fixture(&input, "ch_alps-2.tif", "");
        write_fixture(&input, "ch_jura-1.tif", "");

        let settings = MergeSettings {
            dry_run: true,
            skip_single: true,
            ..merge_settings()
        };
        let report = merge_by_region(&input, &output, &settings).unwrap();

        assert_eq!(
            report.done,
            vec![
                (
                    "alps".to_string(),
                    RegionOutcome::Planned {
                        output: output.join("ch_alps_merged.tif"),
                        tiles: 2
                    }
                ),
                ("jura".to_string(), RegionOutcome::Skipped("single tile")),
            ]
        );
        assert!(!output.exists());
    }

    #[test]
    fn test_unreadable_region_does_not_stop_others() {
        let dir = scratch_dir();
        let input = dir.path().join("tiles");
        write_fixture(&input, "ch_alps-1.tif", "not a tiff");
        write_fixture(&input, "ch_alps-2.tif", "not a tiff");
        write_raster(&input.join("ch_jura-1.tif"), 4_600_000.0, 3_300_000.0, 8, 8, 3.0, DataType::Float32);

        let report = merge_by_region(&input, &dir.path().join("out"), &merge_settings()).unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "alps");
        assert!(matches!(report.failed[0].1, ConvertError::Read { .. }));
        assert_eq!(report.done.len(), 1);
    }

    #[test]
    fn test_missing_input_dir() {
        let dir = scratch_dir();
        assert!(matches!(
            merge_by_region(&dir.path().join("absent"), dir.path(), &merge_settings()),
            Err(ConvertError::List { .. })
        ));
    }

    // ========================================================================
    // Mask
    // ========================================================================

    /// Right triangle over Field B with its right angle at the south-west corner.
    const TRIANGLE_EPSG3035: &str = r#"{
  "type": "Feature",
  "crs": { "type": "name", "properties": { "name": "EPSG:3035" } },
  "properties": {},
  "geometry": {
    "type": "Polygon",
    "coordinates": [[
      [4550000.0, 3270000.0], [4551000.0, 3270000.0], [4550000.0, 3271000.0], [4550000.0, 3270000.0]
    ]]
  }
}"#;

    /// 1 km square far east of every test raster.
    const FAR_EPSG3035: &str = r#"{
  "type": "Polygon",
  "crs": { "type": "name", "properties": { "name": "EPSG:3035" } },
  "coordinates": [[
    [4700000.0, 3270000.0], [4701000.0, 3270000.0], [4701000.0, 3271000.0],
    [4700000.0, 3271000.0], [4700000.0, 3270000.0]
  ]]
}"#;

    fn mask_fixture(data_type: DataType) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = scratch_dir();
        let input = dir.path().join("clc.tif");
        // 2 km square around Field B
        write_raster(&input, 4_549_500.0, 3_271_500.0, 200, 200, 7.0, data_type);
        let regions = dir.path().join("regions");
        write_fixture(&regions, "field_b.geojson", aoi::FIELD_B_EPSG3035);
        write_fixture(&regions, "triangle.json", TRIANGLE_EPSG3035);
        write_fixture(&regions, "far.geojson", FAR_EPSG3035);
        write_fixture(&regions, "readme.txt", "not a region");
        (dir, input, regions)
    }

    #[test]
    fn test_lists_regions_sorted() {
        let (_dir, _input, regions) = mask_fixture(DataType::Float32);
        let names: Vec<String> = list_regions(&regions)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["far.geojson", "field_b.geojson", "triangle.json"]);
    }

    #[test]
    fn test_masks_each_region_and_reports_misses() {
        let (dir, input, regions) = mask_fixture(DataType::Float32);
        let output = dir.path().join("masked");

        let report = mask_by_regions(&input, &regions, &output, &mask_settings()).unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "far");
        assert!(matches!(report.failed[0].1, ConvertError::NoOverlap(_)));
        assert_eq!(
            report.done,
            vec![
                ("field_b".to_string(), RegionOutcome::Masked(output.join("field_b_mask.tif"))),
                ("triangle".to_string(), RegionOutcome::Masked(output.join("triangle_mask.tif"))),
            ]
        );

        let square = read_geotiff(&output.join("field_b_mask.tif")).unwrap();
        assert_eq!((square.width, square.height), (100, 100));
        assert_eq!(square.valid_count(), 100 * 100);

        let triangle = read_geotiff(&output.join("triangle_mask.tif")).unwrap();
        assert_eq!((triangle.width, triangle.height), (100, 100));
        let data = &triangle.bands[0].data;
        // South-west corner inside, north-east corner outside
        assert_eq!(data[99 * 100], 7.0);
        assert!(triangle.is_nodata(data[99]));
        assert!(triangle.valid_count() < 100 * 100);
        assert!(triangle.valid_count() > 100 * 100 / 3);
    }

    #[test]
    fn test_dst_nodata_replaces_missing_value() {
        let (dir, input, regions) = mask_fixture(DataType::Float32);
        let settings = MaskSettings {
            dst_nodata: Some(-9999.0),
            ..mask_settings()
        };

        mask_by_regions(&input, &regions, &dir.path().join("masked"), &settings).unwrap();

        let triangle = read_geotiff(&dir.path().join("masked/triangle_mask.tif")).unwrap();
        assert_eq!(triangle.nodata, -9999.0);
        assert_eq!(triangle.bands[0].data[99], -9999.0);
        assert!(triangle.bands[0].data.iter().all(|v| *v == 7.0 || *v == -9999.0));
    }

    #[test]
    fn test_unrepresentable_dst_nodata_fails_region() {
        let (dir, input, regions) = mask_fixture(DataType::UInt8);
        let settings = MaskSettings {
            dst_nodata: Some(-9999.0),
            ..mask_settings()
        };

        let report = mask_by_regions(&input, &regions, &dir.path().join("masked"), &settings).unwrap();

        assert!(report.done.is_empty());
        assert!(report
            .failed
            .iter()
            .filter(|(name, _)| name != "far")
            .all(|(_, e)| matches!(e, ConvertError::Cast { .. })));
    }

    #[test]
    fn test_skip_existing_keeps_output() {
        let (dir, input, regions) = mask_fixture(DataType::Float32);
        let output = dir.path().join("masked");
        write_fixture(&output, "field_b_mask.tif", "keep me");
        let settings = MaskSettings {
            skip_existing: true,
            ..mask_settings()
        };

        let report = mask_by_regions(&input, &regions, &output, &settings).unwrap();

        assert!(report
            .done
            .contains(&("field_b".to_string(), RegionOutcome::Skipped("output exists"))));
        assert_eq!(std::fs::read_to_string(output.join("field_b_mask.tif")).unwrap(), "keep me");
    }

    #[test]
    fn test_unreadable_input_aborts() {
        let dir = scratch_dir();
        let input = write_fixture(dir.path(), "broken.tif", "not a tiff");
        assert!(matches!(
            mask_by_regions(&input, dir.path(), &dir.path().join("out"), &mask_settings()),
            Err(ConvertError::Read { .. })
        ));
    }
}
