//! GeoTIFF key directory (tag 34735) encoding and decoding.

use etl_common::CrsCode;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Key directory for `crs`: model type, raster type (PixelIsArea) and the
/// EPSG code under the geographic or projected CS key.
pub fn key_directory(crs: CrsCode) -> Vec<u16> {
    let epsg = crs.epsg() as u16;
    let (model, cs_key) = if crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE)
    };

    vec![
        1, 1, 0, 3, // version 1.1.0, 3 keys
        GT_MODEL_TYPE, 0, 1, model,
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        cs_key, 0, 1, epsg,
    ]
}

/// EPSG code declared in a key directory, if any.
///
/// Only keys stored inline (TIFFTagLocation 0) are considered.
pub fn epsg_from_directory(keys: &[u16]) -> Option<u32> {
    if keys.len() < 4 {
        return None;
    }
    let count = keys[3] as usize;
    let mut geographic = None;
    let mut projected = None;

    for entry in keys[4..].chunks_exact(4).take(count) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match id {
            PROJECTED_CS_TYPE => projected = Some(value as u32),
            GEOGRAPHIC_TYPE => geographic = Some(value as u32),
            _ => {}
        }
    }

    // 32767 is "user-defined"
    projected
        .filter(|c| *c != 32767)
        .or(geographic.filter(|c| *c != 32767))
}
