//! Batch GeoTIFF to Cloud-Optimized GeoTIFF converter.
//!
//! `convert` turns every `.tif`/`.tiff` directly inside an input directory
//! into a COG, optionally reprojecting and casting on the way.
//! `merge-by-region` joins tiles that share a region token in their file
//! names, and `mask-by-regions` clips one raster to each GeoJSON region file.

mod convert;
mod regions;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use etl_common::CrsCode;
use raster::{DataType, ResamplingMethod};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use convert::{convert_dir, ConvertSettings};
use regions::{mask_by_regions, merge_by_region, MaskSettings, MergeSettings, RegionReport};

#[derive(Parser, Debug)]
#[command(name = "cog-convert")]
#[command(about = "Convert, merge and mask GeoTIFFs as Cloud-Optimized GeoTIFFs")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Tile edge in pixels
    #[arg(long, global = true, default_value_t = 512)]
    tile_size: usize,

    /// DEFLATE level 0-9
    #[arg(long, global = true, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    compression_level: u32,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a directory of GeoTIFFs to COGs
    Convert(ConvertArgs),
    /// Merge tiles that share a region token in their file names
    MergeByRegion(MergeArgs),
    /// Clip one raster to every region file in a directory
    MaskByRegions(MaskArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Directory holding the source GeoTIFFs
    #[arg(short, long)]
    input_dir: PathBuf,

    /// Directory the COGs are written to
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Appended to each file's base name
    #[arg(long, default_value = "_cog")]
    suffix: String,

    /// Reproject when the source CRS differs, e.g. EPSG:3035
    #[arg(long, value_parser = parse_crs)]
    target_crs: Option<CrsCode>,

    /// Output data type (uint8, uint16, int16, uint32, int32, float32, float64)
    #[arg(long, value_parser = parse_data_type)]
    dtype: Option<DataType>,

    /// Resampling used when reprojecting
    #[arg(long, default_value = "nearest", value_parser = parse_resampling)]
    resampling: ResamplingMethod,
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Directory searched recursively for tiles
    #[arg(short, long)]
    input_dir: PathBuf,

    /// Directory the merged rasters are written to
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Text before the region token in each file name
    #[arg(long, default_value = "")]
    prefix: String,

    /// Characters that end the region token
    #[arg(long, default_value = "-_")]
    separators: String,

    /// Appended to `<prefix><region>` for the output name
    #[arg(long, default_value = "_merged.tif")]
    suffix: String,

    /// Resampling used when tiles are not on one grid
    #[arg(long, default_value = "nearest", value_parser = parse_resampling)]
    resampling: ResamplingMethod,

    /// Missing-data value of every tile and of the output
    #[arg(long, allow_negative_numbers = true)]
    src_nodata: Option<f32>,

    /// Leave regions with a single tile out instead of copying it
    #[arg(long)]
    skip_single: bool,

    /// Rebuild outputs that already exist
    #[arg(long)]
    overwrite: bool,

    /// Log the planned merges without writing anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct MaskArgs {
    /// Raster clipped for each region
    #[arg(short, long)]
    input: PathBuf,

    /// Directory of .geojson/.json region files
    #[arg(short, long)]
    regions_dir: PathBuf,

    /// Directory the masked rasters are written to
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Appended to each region file's base name
    #[arg(long, default_value = "_mask.tif")]
    suffix: String,

    /// Missing-data value written outside the region
    #[arg(long, allow_negative_numbers = true)]
    dst_nodata: Option<f32>,

    /// Keep outputs that already exist
    #[arg(long)]
    skip_existing: bool,
}

fn parse_crs(s: &str) -> std::result::Result<CrsCode, String> {
    CrsCode::parse(s).map_err(|e| e.to_string())
}

fn parse_data_type(s: &str) -> std::result::Result<DataType, String> {
    DataType::parse(s).ok_or_else(|| format!("unknown data type '{}'", s))
}

fn parse_resampling(s: &str) -> std::result::Result<ResamplingMethod, String> {
    ResamplingMethod::parse(s).ok_or_else(|| format!("'{}' is not nearest, bilinear or cubic", s))
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let builder = fmt().with_env_filter(filter).with_target(true);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Batch aborted");
            ExitCode::FAILURE
        }
    }
}

/// True when every file or region succeeded.
fn run(cli: &Cli) -> Result<bool> {
    if cli.tile_size == 0 || cli.tile_size % 16 != 0 {
        anyhow::bail!("--tile-size must be a positive multiple of 16");
    }

    match &cli.command {
        Command::Convert(args) => {
            let settings = ConvertSettings {
                suffix: args.suffix.clone(),
                target_crs: args.target_crs,
                data_type: args.dtype,
                resampling: args.resampling,
                tile_size: cli.tile_size,
                compression_level: cli.compression_level,
            };

            let report = convert_dir(&args.input_dir, &args.output_dir, &settings)?;
            info!(
                converted = report.converted.len(),
                failed = report.failed.len(),
                "Batch complete"
            );
            for (path, e) in &report.failed {
                eprintln!("{}: {}", path.display(), e);
            }
            Ok(report.failed.is_empty())
        }
        Command::MergeByRegion(args) => {
            let settings = MergeSettings {
                prefix: args.prefix.clone(),
                separators: args.separators.clone(),
                suffix: args.suffix.clone(),
                resampling: args.resampling,
                src_nodata: args.src_nodata,
                skip_single: args.skip_single,
                overwrite: args.overwrite,
                dry_run: args.dry_run,
                tile_size: cli.tile_size,
                compression_level: cli.compression_level,
            };
            let report = merge_by_region(&args.input_dir, &args.output_dir, &settings)?;
            Ok(finish(&report))
        }
        Command::MaskByRegions(args) => {
            let settings = MaskSettings {
                suffix: args.suffix.clone(),
                dst_nodata: args.dst_nodata,
                skip_existing: args.skip_existing,
                tile_size: cli.tile_size,
                compression_level: cli.compression_level,
            };
            let report = mask_by_regions(&args.input, &args.regions_dir, &args.output_dir, &settings)?;
            Ok(finish(&report))
        }
    }
}

fn finish(report: &RegionReport) -> bool {
    info!(done = report.done.len(), failed = report.failed.len(), "Regions complete");
    for (region, e) in &report.failed {
        eprintln!("{}: {}", region, e);
    }
    report.failed.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_value_parsers() {
        let cli = Cli::try_parse_from([
            "cog-convert",
            "convert",
            "-i",
            "in",
            "-o",
            "out",
            "--target-crs",
            "EPSG:32633",
            "--dtype",
            "Int32",
        ])
        .unwrap();
        let Command::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(args.target_crs, Some(CrsCode::Utm { zone: 33, north: true }));
        assert_eq!(args.dtype, Some(DataType::Int32));
        assert_eq!(args.resampling, ResamplingMethod::Nearest);
        assert_eq!(cli.tile_size, 512);

        assert!(Cli::try_parse_from(["cog-convert", "convert", "-i", "in", "-o", "out", "--dtype", "complex64"]).is_err());
    }

    #[test]
    fn test_merge_by_region_args() {
        let cli = Cli::try_parse_from([
            "cog-convert",
            "merge-by-region",
            "-i",
            "tiles",
            "-o",
            "merged",
            "--prefix",
            "meta_canopy_height_",
            "--src-nodata",
            "-9999",
            "--dry-run",
            "--tile-size",
            "256",
        ])
        .unwrap();
        assert_eq!(cli.tile_size, 256);
        let Command::MergeByRegion(args) = cli.command else {
            panic!("expected merge-by-region");
        };
        assert_eq!(args.prefix, "meta_canopy_height_");
        assert_eq!(args.separators, "-_");
        assert_eq!(args.suffix, "_merged.tif");
        assert_eq!(args.src_nodata, Some(-9999.0));
        assert!(args.dry_run);
        assert!(!args.overwrite);
    }

    #[test]
    fn test_mask_by_regions_args() {
        let cli = Cli::try_parse_from([
            "cog-convert",
            "mask-by-regions",
            "-i",
            "clc.tif",
            "-r",
            "regions",
            "-o",
            "masked",
            "--dst-nodata",
            "-9999",
        ])
        .unwrap();
        let Command::MaskByRegions(args) = cli.command else {
            panic!("expected mask-by-regions");
        };
        assert_eq!(args.regions_dir, PathBuf::from("regions"));
        assert_eq!(args.suffix, "_mask.tif");
        assert_eq!(args.dst_nodata, Some(-9999.0));
        assert!(!args.skip_existing);

        assert!(Cli::try_parse_from(["cog-convert", "mask-by-regions", "-i", "clc.tif", "-o", "masked"]).is_err());
    }

    #[test]
    fn test_rejects_bad_tile_size() {
        let cli = Cli::try_parse_from(["cog-convert", "convert", "-i", "in", "-o", "out", "--tile-size", "100"]).unwrap();
        assert!(run(&cli).is_err());
    }
}
