//! Cropping a raster to an AOI and masking pixels outside its polygons.

use etl_common::{CrsCode, MultiPolygon};
use projection::Transformer;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{RasterError, Result};
use crate::types::{Band, GeoTransform, RasterArtifact};

/// Points inserted per polygon edge before moving the mask into the raster CRS.
const MASK_DENSIFY_SEGMENTS: usize = 8;

/// Crop `src` to the bounding box of `aoi` and set pixels whose centers fall
/// outside every polygon to nodata.
///
/// `aoi_crs` is the CRS the polygons are expressed in; they are moved into the
/// raster's CRS first when the two differ.
pub fn clip(src: &RasterArtifact, aoi: &MultiPolygon, aoi_crs: CrsCode) -> Result<RasterArtifact> {
    let mask_geom = if aoi_crs == src.crs {
        aoi.clone()
    } else {
        let forward = Transformer::new(aoi_crs, src.crs);
        aoi.densify(MASK_DENSIFY_SEGMENTS)
            .try_map(|x, y| forward.transform(x, y))?
    };

    let aoi_bbox = mask_geom
        .bbox()
        .ok_or_else(|| RasterError::empty("AOI has no polygons"))?;
    let extent = src.bbox();

    let (c0, r0) = src.transform.world_to_pixel(aoi_bbox.min_x, aoi_bbox.max_y);
    let (c1, r1) = src.transform.world_to_pixel(aoi_bbox.max_x, aoi_bbox.min_y);

    let col_start = c0.floor().max(0.0) as usize;
    let row_start = r0.floor().max(0.0) as usize;
    let col_end = (c1.ceil().max(0.0) as usize).min(src.width);
    let row_end = (r1.ceil().max(0.0) as usize).min(src.height);

    if col_start >= col_end || row_start >= row_end {
        return Err(RasterError::NoOverlap {
            requested: format!("{:?}", aoi_bbox),
            extent: format!("{:?}", extent),
        });
    }

    let width = col_end - col_start;
    let height = row_end - row_start;
    let (origin_x, origin_y) = src
        .transform
        .pixel_to_world(col_start as f64, row_start as f64);
    let transform = GeoTransform::new(
        origin_x,
        origin_y,
        src.transform.pixel_width,
        src.transform.pixel_height,
    );

    let inside: Vec<bool> = (0..width * height)
        .into_par_iter()
        .map(|idx| {
            let (x, y) = transform.pixel_to_world((idx % width) as f64 + 0.5, (idx / width) as f64 + 0.5);
            mask_geom.contains(x, y)
        })
        .collect();

    let bands = src
        .bands
        .iter()
        .map(|band| {
            let mut data = Vec::with_capacity(width * height);
            for row in row_start..row_end {
                let offset = row * src.width;
                data.extend_from_slice(&band.data[offset + col_start..offset + col_end]);
            }
            for (v, keep) in data.iter_mut().zip(&inside) {
                if !keep {
                    *v = src.nodata;
                }
            }
            Band::new(band.name.clone(), data)
        })
        .collect();

    debug!(
        width,
        height,
        masked = inside.iter().filter(|k| !**k).count(),
        "Clipped raster to AOI"
    );

    src.with_grid(bands, width, height, transform, src.crs)
}
