//! Merging overlapping rasters onto one grid.

use tracing::debug;

use crate::error::{RasterError, Result};
use crate::types::{GeoTransform, RasterArtifact, ResamplingMethod};
use crate::warp::{reproject, warp, TargetGrid};

/// Merge `pieces` onto a grid covering all of them, aligned to the first
/// piece's CRS and pixel size.
///
/// Pieces are painted in order and an earlier valid value is never
/// overwritten, so the first piece wins where several have data.
pub fn mosaic(pieces: &[RasterArtifact], method: ResamplingMethod) -> Result<RasterArtifact> {
    let (first, rest) = pieces
        .split_first()
        .ok_or_else(|| RasterError::empty("nothing to mosaic"))?;
    if rest.is_empty() {
        return Ok(first.clone());
    }

    let rest = rest
        .iter()
        .map(|p| {
            if p.crs == first.crs {
                Ok(p.clone())
            } else {
                reproject(p, first.crs, method)
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let extent = rest.iter().fold(first.bbox(), |acc, p| acc.union(&p.bbox()));
    let (px, py) = first.resolution();
    let (transform, width, height) = GeoTransform::covering(&extent, px, py);
    let grid = TargetGrid {
        crs: first.crs,
        transform,
        width,
        height,
    };
    debug!(pieces = pieces.len(), width, height, "Mosaicking");

    let mut base = warp(first, &grid, method)?;
    for piece in &rest {
        let aligned = warp(piece, &grid, method)?;
        for (band, other) in base.bands.iter_mut().zip(&aligned.bands) {
            for (v, &o) in band.data.iter_mut().zip(&other.data) {
                if (v.is_nan() || *v == first.nodata) && !aligned.is_nodata(o) {
                    *v = o;
                }
            }
        }
    }
    Ok(base.with_observations(pieces.len() as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Band;
    use etl_common::CrsCode;

    fn tile(origin_x: f64, value: f32) -> RasterArtifact {
        RasterArtifact::new(
            vec![Band::new("band_1", vec![value; 16])],
            4,
            4,
            GeoTransform::new(origin_x, 3_271_000.0, 10.0, 10.0),
            CrsCode::Epsg3035,
            -9999.0,
        )
        .unwrap()
    }

    #[test]
    fn test_mosaic_two_tiles() {
        let merged = mosaic(&[tile(4_550_000.0, 1.0), tile(4_550_040.0, 2.0)], ResamplingMethod::Nearest).unwrap();
        assert_eq!(merged.width, 8);
        assert_eq!(merged.height, 4);
        assert_eq!(merged.bands[0].data[0], 1.0);
        assert_eq!(merged.bands[0].data[7], 2.0);
        assert_eq!(merged.observations, 2);
    }

    #[test]
    fn test_first_piece_wins_and_fills_gaps() {
        let mut holed = tile(4_550_000.0, 1.0);
        holed.bands[0].data[0] = -9999.0;
        let merged = mosaic(&[holed, tile(4_550_000.0, 2.0)], ResamplingMethod::Nearest).unwrap();
        assert_eq!((merged.width, merged.height), (4, 4));
        assert_eq!(merged.bands[0].data[0], 2.0);
        assert!(merged.bands[0].data[1..].iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_single_piece_is_unchanged() {
        let only = tile(4_550_000.0, 5.0);
        let merged = mosaic(std::slice::from_ref(&only), ResamplingMethod::Nearest).unwrap();
        assert_eq!(merged.bands[0].data, only.bands[0].data);
    }

    #[test]
    fn test_mosaic_empty() {
        assert!(matches!(
            mosaic(&[], ResamplingMethod::Nearest),
            Err(RasterError::Empty(_))
        ));
    }
}
