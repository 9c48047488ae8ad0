//! Local GeoTIFF directory source (one raster per country or tile).
//!
//! Only the header of each file is read until it is known to intersect the
//! AOI; then only the window under the AOI is decoded.

use async_trait::async_trait;
use etl_common::{BoundingBox, CrsCode, MultiPolygon};
use projection::Transformer;
use raster::{Band, RasterArtifact, RasterError, ResamplingMethod};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use super::{DataSource, ExtractRequest, Result};
use crate::error::ExtractionError;

/// Reads rasters from a directory, keeping those that intersect the AOI.
///
/// When several rasters overlap the AOI they are mosaicked onto the grid of
/// the first one (in file-name order); earlier files win where both have data.
#[derive(Debug, Clone)]
pub struct LocalRasterSource {
    dir: PathBuf,
}

impl LocalRasterSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DataSource for LocalRasterSource {
    #[instrument(skip_all, fields(variable = %request.variable.name, dir = %self.dir.display()))]
    async fn fetch(&self, request: &ExtractRequest<'_>) -> Result<RasterArtifact> {
        let dir = self.dir.clone();
        let aoi = request.aoi.target.clone();
        let aoi_crs = request.aoi.target_crs;
        let aoi_bbox = request.aoi.bbox;
        let band_name = request
            .variable
            .extractor
            .bands
            .first()
            .cloned()
            .unwrap_or_else(|| request.variable.name.clone());

        tokio::task::spawn_blocking(move || read_intersecting(&dir, &aoi, aoi_crs, &aoi_bbox, &band_name))
            .await
            .map_err(|e| ExtractionError::InvalidResponse(format!("raster scan task failed: {}", e)))?
    }
}

/// GeoTIFF files under `dir`, sorted by path.
pub fn list_rasters(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ExtractionError::Unsupported(format!(
            "raster directory {} does not exist",
            dir.display()
        )));
    }

    let files = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
                .unwrap_or(false)
        })
        .collect();

    Ok(files)
}

fn read_intersecting(
    dir: &Path,
    aoi: &MultiPolygon,
    aoi_crs: CrsCode,
    aoi_bbox: &BoundingBox,
    band_name: &str,
) -> Result<RasterArtifact> {
    let mut pieces = Vec::new();

    for path in list_rasters(dir)? {
        let meta = match cog::read_geotiff_meta(&path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable raster");
                continue;
            }
        };

        let footprint = match Transformer::new(aoi_crs, meta.crs).transform_bbox(aoi_bbox, 16) {
            Ok(footprint) if footprint.intersects(&meta.bbox()) => footprint,
            _ => {
                debug!(path = %path.display(), "Raster does not intersect AOI");
                continue;
            }
        };

        let tile = match cog::read_geotiff_window(&path, &footprint) {
            Ok(Some(tile)) => tile,
            Ok(None) => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable raster");
                continue;
            }
        };

        match raster::clip(&tile, aoi, aoi_crs) {
            Ok(clipped) => {
                debug!(path = %path.display(), width = clipped.width, height = clipped.height, "Using raster");
                pieces.push(clipped);
            }
            Err(RasterError::NoOverlap { .. }) => continue,
            Err(e) => return Err(ExtractionError::InvalidResponse(e.to_string())),
        }
    }

    if pieces.is_empty() {
        return Err(ExtractionError::Unsupported(format!(
            "no raster in {} intersects the AOI",
            dir.display()
        )));
    }
    let count = pieces.len() as u32;
    let merged = raster::mosaic(&pieces, ResamplingMethod::Nearest)
        .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))?;

    let first = merged
        .bands
        .into_iter()
        .next()
        .map(|b| Band::new(band_name, b.data))
        .ok_or_else(|| ExtractionError::InvalidResponse("raster has no bands".to_string()))?;

    RasterArtifact::new(
        vec![first],
        merged.width,
        merged.height,
        merged.transform,
        merged.crs,
        merged.nodata,
    )
    .map(|r| r.with_data_type(merged.data_type).with_observations(count))
    .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))
}
