//! Per-file GeoTIFF to COG conversion.

use cog::{read_geotiff, write_cog, CogError, CogOptions};
use etl_common::CrsCode;
use pipeline::AoiError;
use raster::{cast, reproject, DataType, DownsampleMethod, RasterArtifact, RasterError, ResamplingMethod};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("failed to list {path}: {reason}")]
    List { path: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Read { path: String, source: CogError },

    #[error("failed to reproject to {crs}: {source}")]
    Reproject { crs: CrsCode, source: RasterError },

    #[error("failed to cast to {data_type}: {source}")]
    Cast { data_type: DataType, source: RasterError },

    #[error("failed to write {path}: {source}")]
    Write { path: String, source: CogError },

    #[error("output {0} would overwrite its input")]
    SameFile(String),

    #[error("failed to copy {path}: {reason}")]
    Copy { path: String, reason: String },

    #[error("failed to mosaic region '{region}': {source}")]
    Mosaic { region: String, source: RasterError },

    #[error("failed to load region {path}: {source}")]
    Region { path: String, source: AoiError },

    #[error("region {0} does not overlap the raster")]
    NoOverlap(String),

    #[error("failed to clip to {path}: {source}")]
    Clip { path: String, source: RasterError },
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// What to do with every input file.
#[derive(Debug, Clone)]
pub struct ConvertSettings {
    pub suffix: String,
    pub target_crs: Option<CrsCode>,
    pub data_type: Option<DataType>,
    pub resampling: ResamplingMethod,
    pub tile_size: usize,
    pub compression_level: u32,
}

/// Outcome of a whole batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub converted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, ConvertError)>,
}

/// `.tif`/`.tiff` files directly inside `dir`, sorted by name.
pub fn list_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| ConvertError::List {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file() && is_tiff(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// True for a `.tif` or `.tiff` extension in any case.
pub fn is_tiff(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
        .unwrap_or(false)
}

/// `<output_dir>/<basename><suffix>.tif`
pub fn output_path(input: &Path, output_dir: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    output_dir.join(format!("{}{}.tif", stem, suffix))
}

/// Convert every input file, continuing past failures.
pub fn convert_dir(input_dir: &Path, output_dir: &Path, settings: &ConvertSettings) -> Result<BatchReport> {
    let inputs = list_inputs(input_dir)?;
    info!(files = inputs.len(), input = %input_dir.display(), "Converting GeoTIFFs");

    std::fs::create_dir_all(output_dir).map_err(|e| ConvertError::List {
        path: output_dir.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut report = BatchReport::default();
    for input in inputs {
        let output = output_path(&input, output_dir, &settings.suffix);
        match convert_file(&input, &output, settings) {
            Ok(bytes) => {
                info!(input = %input.display(), output = %output.display(), bytes, "Converted");
                report.converted.push(output);
            }
            Err(e) => {
                tracing::error!(input = %input.display(), error = %e, "Conversion failed");
                report.failed.push((input, e));
            }
        }
    }
    Ok(report)
}

/// Read `input`, reproject and cast as requested, and write a COG.
#[instrument(skip_all, fields(input = %input.display()))]
pub fn convert_file(input: &Path, output: &Path, settings: &ConvertSettings) -> Result<u64> {
    if input == output {
        return Err(ConvertError::SameFile(output.display().to_string()));
    }

    let mut raster = read_geotiff(input).map_err(|source| ConvertError::Read {
        path: input.display().to_string(),
        source,
    })?;

    if let Some(crs) = settings.target_crs.filter(|crs| *crs != raster.crs) {
        debug!(from = %raster.crs, to = %crs, "Reprojecting");
        raster = reproject(&raster, crs, settings.resampling)
            .map_err(|source| ConvertError::Reproject { crs, source })?;
    }

    if let Some(data_type) = settings.data_type {
        raster = cast(&raster, data_type).map_err(|source| ConvertError::Cast { data_type, source })?;
    }

    write_output(&raster, output, settings.tile_size, settings.compression_level)
}

/// Write `raster` as a COG; integer rasters get nearest overviews, floats mean.
pub fn write_output(raster: &RasterArtifact, output: &Path, tile_size: usize, compression_level: u32) -> Result<u64> {
    let options = CogOptions {
        tile_size,
        compression_level,
        overview_method: if raster.data_type.is_integer() {
            DownsampleMethod::Nearest
        } else {
            DownsampleMethod::Mean
        },
    };

    write_cog(raster, output, &options).map_err(|source| ConvertError::Write {
        path: output.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use raster::{Band, GeoTransform};
    use test_utils::{create_class_grid, create_reflectance_grid, scratch_dir, write_fixture};

    fn settings() -> ConvertSettings {
        ConvertSettings {
            suffix: "_cog".into(),
            target_crs: None,
            data_type: None,
            resampling: ResamplingMethod::Nearest,
            tile_size: 256,
            compression_level: 6,
        }
    }

    fn write_input(path: &Path, crs: CrsCode, data: Vec<f32>, data_type: DataType) {
        let transform = match crs {
            CrsCode::Epsg4326 => GeoTransform::new(13.30, 52.51, 0.0001, 0.0001),
            _ => GeoTransform::new(4_550_000.0, 3_271_000.0, 10.0, 10.0),
        };
        let raster = RasterArtifact::new(vec![Band::new("b1", data)], 64, 64, transform, crs, 0.0)
            .unwrap()
            .with_data_type(data_type);
        write_cog(&raster, path, &CogOptions::default()).unwrap();
    }

    #[test]
    fn test_lists_sorted_non_recursive() {
        let dir = scratch_dir();
        for name in ["b.tif", "a.TIFF", "notes.txt", "nested/c.tif"] {
            write_fixture(dir.path(), name, "");
        }
        let names: Vec<String> = list_inputs(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.TIFF", "b.tif"]);
    }

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path(Path::new("/in/clc_2018.tiff"), Path::new("/out"), "_cog"),
            PathBuf::from("/out/clc_2018_cog.tif")
        );
    }

    #[test]
    fn test_direct_conversion_with_cast() {
        let dir = scratch_dir();
        let input = dir.path().join("in/classes.tif");
        std::fs::create_dir_all(input.parent().unwrap()).unwrap();
        write_input(&input, CrsCode::Epsg3035, create_class_grid(64, 64, &[1.0, 2.0, 3.0]), DataType::Float32);

        let output = dir.path().join("out.tif");
        let settings = ConvertSettings {
            data_type: Some(DataType::UInt16),
            target_crs: Some(CrsCode::Epsg3035),
            ..settings()
        };
        convert_file(&input, &output, &settings).unwrap();

        let written = read_geotiff(&output).unwrap();
        assert_eq!(written.data_type, DataType::UInt16);
        assert_eq!(written.crs, CrsCode::Epsg3035);
        assert_eq!((written.width, written.height), (64, 64));
    }

    #[test]
    fn test_reprojecting_conversion() {
        let dir = scratch_dir();
        let input = dir.path().join("wgs84.tif");
        write_input(
            &input,
            CrsCode::Epsg4326,
            create_reflectance_grid(64, 64, 0.1, 0.5),
            DataType::Float32,
        );

        let output = dir.path().join("laea.tif");
        let settings = ConvertSettings {
            target_crs: Some(CrsCode::Epsg3035),
            ..settings()
        };
        convert_file(&input, &output, &settings).unwrap();

        let written = read_geotiff(&output).unwrap();
        assert_eq!(written.crs, CrsCode::Epsg3035);
        assert!(written.valid_count() > 0);
    }

    #[test]
    fn test_batch_continues_past_bad_files() {
        let dir = scratch_dir();
        let input_dir = dir.path().join("in");
        std::fs::create_dir_all(&input_dir).unwrap();
        write_fixture(&input_dir, "a_broken.tif", "not a tiff");
        write_input(
            &input_dir.join("b_good.tif"),
            CrsCode::Epsg3035,
            create_reflectance_grid(64, 64, 0.1, 0.5),
            DataType::Float32,
        );

        let report = convert_dir(&input_dir, &dir.path().join("out"), &settings()).unwrap();

        assert_eq!(report.converted, vec![dir.path().join("out/b_good_cog.tif")]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, ConvertError::Read { .. }));
    }

    #[test]
    fn test_refuses_to_overwrite_input() {
        let dir = scratch_dir();
        let input = dir.path().join("x.tif");
        let settings = ConvertSettings {
            suffix: String::new(),
            ..settings()
        };
        let output = output_path(&input, dir.path(), &settings.suffix);
        assert!(matches!(
            convert_file(&input, &output, &settings),
            Err(ConvertError::SameFile(_))
        ));
    }
}
