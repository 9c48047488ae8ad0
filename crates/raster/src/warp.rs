//! Warping rasters onto a new grid: reprojection and resolution changes.

use etl_common::CrsCode;
use projection::Transformer;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{RasterError, Result};
use crate::interpolation;
use crate::types::{Band, GeoTransform, RasterArtifact, ResamplingMethod};

/// Meters per degree used when a resolution in meters has to be expressed in
/// a geographic CRS (and vice versa).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Largest output grid a single warp may allocate.
const MAX_OUTPUT_PIXELS: usize = 400_000_000;

/// Output grid definition for a warp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetGrid {
    pub crs: CrsCode,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

impl TargetGrid {
    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RasterError::empty(format!(
                "target grid {}x{}",
                self.width, self.height
            )));
        }
        if self.width.saturating_mul(self.height) > MAX_OUTPUT_PIXELS {
            return Err(RasterError::invalid_parameter(format!(
                "target grid {}x{} exceeds {} pixels",
                self.width, self.height, MAX_OUTPUT_PIXELS
            )));
        }
        Ok(())
    }
}

/// Convert a pixel size from one CRS's units to another's.
fn convert_pixel_size(size: f64, from: CrsCode, to: CrsCode) -> f64 {
    match (from.is_geographic(), to.is_geographic()) {
        (true, false) => size * METERS_PER_DEGREE,
        (false, true) => size / METERS_PER_DEGREE,
        _ => size,
    }
}

/// Sample `src` onto `grid`.
///
/// Each output pixel center is mapped back into the source CRS and sampled
/// with `method`. Pixels that fall outside the source or on missing data get
/// the source nodata value.
pub fn warp(src: &RasterArtifact, grid: &TargetGrid, method: ResamplingMethod) -> Result<RasterArtifact> {
    grid.validate()?;

    let inverse = Transformer::new(grid.crs, src.crs);
    let nodata = src.nodata;
    let out_w = grid.width;

    // Source center-index coordinates for every output pixel, shared by all bands
    let coords: Vec<Option<(f64, f64)>> = (0..grid.width * grid.height)
        .into_par_iter()
        .map(|idx| {
            let col = (idx % out_w) as f64 + 0.5;
            let row = (idx / out_w) as f64 + 0.5;
            let (x, y) = grid.transform.pixel_to_world(col, row);
            inverse.transform(x, y).ok().map(|(sx, sy)| {
                let (px, py) = src.transform.world_to_pixel(sx, sy);
                (px - 0.5, py - 0.5)
            })
        })
        .collect();

    let bands = src
        .bands
        .iter()
        .map(|band| {
            let mut out = vec![nodata; grid.width * grid.height];
            out.par_chunks_mut(out_w)
                .enumerate()
                .for_each(|(row, out_row)| {
                    for (col, cell) in out_row.iter_mut().enumerate() {
                        if let Some((px, py)) = coords[row * out_w + col] {
                            if let Some(v) = interpolation::sample(
                                method, &band.data, src.width, src.height, px, py, nodata,
                            ) {
                                *cell = v;
                            }
                        }
                    }
                });
            Band::new(band.name.clone(), out)
        })
        .collect();

    debug!(
        from_crs = %src.crs,
        to_crs = %grid.crs,
        src_width = src.width,
        src_height = src.height,
        width = grid.width,
        height = grid.height,
        method = %method,
        "Warped raster"
    );

    src.with_grid(bands, grid.width, grid.height, grid.transform, grid.crs)
}

/// Warp into `target_crs`, keeping the native pixel size.
///
/// The output grid covers the densified envelope of the source extent. A
/// raster already in `target_crs` is returned unchanged.
pub fn reproject(src: &RasterArtifact, target_crs: CrsCode, method: ResamplingMethod) -> Result<RasterArtifact> {
    if src.crs == target_crs {
        return Ok(src.clone());
    }

    let forward = Transformer::new(src.crs, target_crs);
    let bbox = forward.transform_bbox(&src.bbox(), 20)?;

    let (px, py) = src.resolution();
    let px = convert_pixel_size(px, src.crs, target_crs);
    let py = convert_pixel_size(py, src.crs, target_crs);
    let (transform, width, height) = GeoTransform::covering(&bbox, px, py);

    warp(
        src,
        &TargetGrid {
            crs: target_crs,
            transform,
            width,
            height,
        },
        method,
    )
}

/// Resample to a square pixel of `resolution_m` meters in the raster's own CRS.
///
/// For geographic rasters the resolution is converted to degrees. A raster
/// already at the requested resolution is returned unchanged.
pub fn resample(src: &RasterArtifact, resolution_m: f64, method: ResamplingMethod) -> Result<RasterArtifact> {
    if !(resolution_m.is_finite() && resolution_m > 0.0) {
        return Err(RasterError::invalid_parameter(format!(
            "resolution must be positive, got {}",
            resolution_m
        )));
    }

    let res = if src.crs.is_geographic() {
        resolution_m / METERS_PER_DEGREE
    } else {
        resolution_m
    };

    let (px, py) = src.resolution();
    let tolerance = res * 1e-9;
    if (px - res).abs() <= tolerance && (py - res).abs() <= tolerance {
        return Ok(src.clone());
    }

    let (transform, width, height) = GeoTransform::covering(&src.bbox(), res, res);
    warp(
        src,
        &TargetGrid {
            crs: src.crs,
            transform,
            width,
            height,
        },
        method,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize, pixel: f64, crs: CrsCode) -> RasterArtifact {
        let data = (0..width * height).map(|i| (i % width) as f32).collect();
        RasterArtifact::new(
            vec![Band::new("v", data)],
            width,
            height,
            GeoTransform::new(500_000.0, 5_000_000.0, pixel, pixel),
            crs,
            -9999.0,
        )
        .unwrap()
    }

    #[test]
    fn test_resample_halves_dimensions() {
        let src = ramp(8, 8, 10.0, CrsCode::Utm { zone: 32, north: true });
        let out = resample(&src, 20.0, ResamplingMethod::Nearest).unwrap();
        assert_eq!((out.width, out.height), (4, 4));
        assert_eq!(out.resolution(), (20.0, 20.0));
        assert_eq!(out.bbox(), src.bbox());
    }

    #[test]
    fn test_resample_same_resolution_is_identity() {
        let src = ramp(4, 4, 10.0, CrsCode::Epsg3035);
        let out = resample(&src, 10.0, ResamplingMethod::Bilinear).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn test_resample_rejects_non_positive() {
        let src = ramp(4, 4, 10.0, CrsCode::Epsg3035);
        assert!(resample(&src, 0.0, ResamplingMethod::Bilinear).is_err());
    }

    #[test]
    fn test_reproject_geographic_pixel_size_in_degrees() {
        let src = ramp(10, 10, 10.0, CrsCode::Utm { zone: 32, north: true });
        let out = reproject(&src, CrsCode::Epsg4326, ResamplingMethod::Nearest).unwrap();
        assert_eq!(out.crs, CrsCode::Epsg4326);
        assert!((out.transform.pixel_width - 10.0 / METERS_PER_DEGREE).abs() < 1e-12);
        assert!(out.valid_count() > 0);
    }

    #[test]
    fn test_warp_outside_source_is_nodata() {
        let src = ramp(4, 4, 10.0, CrsCode::Epsg3035);
        let grid = TargetGrid {
            crs: CrsCode::Epsg3035,
            transform: GeoTransform::new(0.0, 0.0, 10.0, 10.0),
            width: 2,
            height: 2,
        };
        let out = warp(&src, &grid, ResamplingMethod::Bilinear).unwrap();
        assert!(out.bands[0].data.iter().all(|v| *v == -9999.0));
    }
}
