//! Downsampling for overview generation.
//!
//! Every overview is computed straight from the full-resolution grid with a
//! block of `factor x factor` source pixels per output pixel, so the result
//! for a given level never depends on how other levels were built.

use serde::{Deserialize, Serialize};

/// Method used to combine a block of source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownsampleMethod {
    /// Average of the valid pixels in the block (continuous data)
    #[default]
    Mean,
    /// Top-left pixel of the block (categorical data, preserves class codes)
    Nearest,
}

/// Downsample a 2D grid by an integer `factor`.
///
/// Output dimensions are `ceil(width / factor)` x `ceil(height / factor)`;
/// partial blocks at the right and bottom edges use the pixels they have.
/// Blocks with no valid pixel become `nodata`.
///
/// # Returns
/// Tuple of (downsampled_data, new_width, new_height)
pub fn downsample(
    data: &[f32],
    width: usize,
    height: usize,
    factor: usize,
    method: DownsampleMethod,
    nodata: f32,
) -> (Vec<f32>, usize, usize) {
    if factor <= 1 {
        return (data.to_vec(), width, height);
    }

    let new_width = width.div_ceil(factor);
    let new_height = height.div_ceil(factor);
    let mut output = vec![nodata; new_width * new_height];

    for out_y in 0..new_height {
        let y0 = out_y * factor;
        let y1 = (y0 + factor).min(height);
        for out_x in 0..new_width {
            let x0 = out_x * factor;
            let x1 = (x0 + factor).min(width);

            output[out_y * new_width + out_x] = match method {
                DownsampleMethod::Nearest => {
                    let v = data[y0 * width + x0];
                    if v.is_nan() {
                        nodata
                    } else {
                        v
                    }
                }
                DownsampleMethod::Mean => {
                    let mut sum = 0.0f64;
                    let mut count = 0usize;
                    for y in y0..y1 {
                        for &v in &data[y * width + x0..y * width + x1] {
                            if !v.is_nan() && v != nodata {
                                sum += v as f64;
                                count += 1;
                            }
                        }
                    }
                    if count == 0 {
                        nodata
                    } else {
                        (sum / count as f64) as f32
                    }
                }
            };
        }
    }

    (output, new_width, new_height)
}
