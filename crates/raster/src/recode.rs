//! Value recoding and output data-type casting.

use num_traits::{Bounded, ToPrimitive};

use crate::error::{RasterError, Result};
use crate::types::{Band, DataType, RasterArtifact};

/// Replace every listed value, every missing sample and the old nodata with
/// `fill`, and make `fill` the new nodata sentinel.
///
/// Used for categorical products where a class code (e.g. 0 = "outside area")
/// must collapse into the nodata value.
pub fn recode(src: &RasterArtifact, values: &[f32], fill: f32) -> Result<RasterArtifact> {
    let bands = src
        .bands
        .iter()
        .map(|band| {
            let data = band
                .data
                .iter()
                .map(|&v| {
                    if src.is_nodata(v) || values.contains(&v) {
                        fill
                    } else {
                        v
                    }
                })
                .collect();
            Band::new(band.name.clone(), data)
        })
        .collect();

    let mut out = src.with_grid(bands, src.width, src.height, src.transform, src.crs)?;
    out.nodata = fill;
    Ok(out)
}

fn bounds_of<T: Bounded + ToPrimitive>() -> (f64, f64) {
    (
        T::min_value().to_f64().unwrap_or(f64::MIN),
        T::max_value().to_f64().unwrap_or(f64::MAX),
    )
}

/// Representable range of an integer data type.
fn integer_range(data_type: DataType) -> Option<(f64, f64)> {
    match data_type {
        DataType::UInt8 => Some(bounds_of::<u8>()),
        DataType::UInt16 => Some(bounds_of::<u16>()),
        DataType::Int16 => Some(bounds_of::<i16>()),
        DataType::UInt32 => Some(bounds_of::<u32>()),
        DataType::Int32 => Some(bounds_of::<i32>()),
        DataType::Float32 | DataType::Float64 => None,
    }
}

/// Set the logical output data type, rounding and clamping samples into the
/// representable range of integer types.
///
/// The nodata sentinel must itself be representable in the target type.
pub fn cast(src: &RasterArtifact, data_type: DataType) -> Result<RasterArtifact> {
    let Some((lo, hi)) = integer_range(data_type) else {
        return Ok(src.clone().with_data_type(data_type));
    };

    let nodata = src.nodata as f64;
    if nodata.fract() != 0.0 || nodata < lo || nodata > hi {
        return Err(RasterError::invalid_parameter(format!(
            "nodata {} is not representable as {}",
            src.nodata, data_type
        )));
    }

    let bands = src
        .bands
        .iter()
        .map(|band| {
            let data = band
                .data
                .iter()
                .map(|&v| {
                    if src.is_nodata(v) {
                        src.nodata
                    } else {
                        (v as f64).round().clamp(lo, hi) as f32
                    }
                })
                .collect();
            Band::new(band.name.clone(), data)
        })
        .collect();

    Ok(src
        .with_grid(bands, src.width, src.height, src.transform, src.crs)?
        .with_data_type(data_type))
}
