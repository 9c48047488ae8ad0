//! Interpolation kernels for grid resampling.
//!
//! Kernels work in "center index" coordinates: `(0.0, 0.0)` is the center of
//! the top-left pixel. Missing samples (NaN or `nodata`) never leak into the
//! result; a kernel that touches one returns `None` or falls back to a smaller
//! kernel.

use crate::types::ResamplingMethod;

#[inline]
fn valid(v: f32, nodata: f32) -> bool {
    !v.is_nan() && v != nodata
}

/// Nearest neighbor interpolation.
pub fn nearest(data: &[f32], width: usize, height: usize, x: f64, y: f64, nodata: f32) -> Option<f32> {
    let col = x.round();
    let row = y.round();
    if col < 0.0 || row < 0.0 {
        return None;
    }
    let (col, row) = (col as usize, row as usize);
    if col >= width || row >= height {
        return None;
    }
    let v = data[row * width + col];
    valid(v, nodata).then_some(v)
}

/// Bilinear interpolation between the four nearest grid points.
///
/// Falls back to nearest neighbor if any corner is missing.
pub fn bilinear(data: &[f32], width: usize, height: usize, x: f64, y: f64, nodata: f32) -> Option<f32> {
    if x < -0.5 || y < -0.5 || x > width as f64 - 0.5 || y > height as f64 - 0.5 {
        return None;
    }
    let xc = x.clamp(0.0, (width - 1) as f64);
    let yc = y.clamp(0.0, (height - 1) as f64);

    let x0 = xc.floor() as usize;
    let y0 = yc.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let xf = (xc - x0 as f64) as f32;
    let yf = (yc - y0 as f64) as f32;

    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x1];
    let v01 = data[y1 * width + x0];
    let v11 = data[y1 * width + x1];

    if ![v00, v10, v01, v11].iter().all(|v| valid(*v, nodata)) {
        return nearest(data, width, height, x, y, nodata);
    }

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    Some(top * (1.0 - yf) + bottom * yf)
}

/// Bicubic interpolation over the surrounding 4x4 points.
///
/// Falls back to bilinear if any of the 16 points is missing.
pub fn cubic(data: &[f32], width: usize, height: usize, x: f64, y: f64, nodata: f32) -> Option<f32> {
    if x < -0.5 || y < -0.5 || x > width as f64 - 0.5 || y > height as f64 - 0.5 {
        return None;
    }
    let xi = x.floor() as i64;
    let yi = y.floor() as i64;
    let xf = (x - xi as f64) as f32;
    let yf = (y - yi as f64) as f32;

    let mut values = [[0.0f32; 4]; 4];
    for (j, row) in values.iter_mut().enumerate() {
        for (i, cell) in row.iter_mut().enumerate() {
            let px = (xi + i as i64 - 1).clamp(0, width as i64 - 1) as usize;
            let py = (yi + j as i64 - 1).clamp(0, height as i64 - 1) as usize;
            let v = data[py * width + px];
            if !valid(v, nodata) {
                return bilinear(data, width, height, x, y, nodata);
            }
            *cell = v;
        }
    }

    let mut row_values = [0.0f32; 4];
    for (j, row) in values.iter().enumerate() {
        row_values[j] = cubic_1d(row[0], row[1], row[2], row[3], xf);
    }
    Some(cubic_1d(row_values[0], row_values[1], row_values[2], row_values[3], yf))
}

/// 1D cubic interpolation using Catmull-Rom spline.
fn cubic_1d(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;

    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    let d = p1;

    a * t3 + b * t2 + c * t + d
}

/// Dispatch to the kernel for `method`.
#[inline]
pub fn sample(
    method: ResamplingMethod,
    data: &[f32],
    width: usize,
    height: usize,
    x: f64,
    y: f64,
    nodata: f32,
) -> Option<f32> {
    match method {
        ResamplingMethod::Nearest => nearest(data, width, height, x, y, nodata),
        ResamplingMethod::Bilinear => bilinear(data, width, height, x, y, nodata),
        ResamplingMethod::Cubic => cubic(data, width, height, x, y, nodata),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ND: f32 = -9999.0;

    #[test]
    fn test_nearest() {
        let data: Vec<f32> = vec![
            1.0, 2.0, 3.0,
            4.0, 5.0, 6.0,
            7.0, 8.0, 9.0,
        ];

        assert_eq!(nearest(&data, 3, 3, 0.0, 0.0, ND), Some(1.0));
        assert_eq!(nearest(&data, 3, 3, 1.0, 1.0, ND), Some(5.0));
        assert_eq!(nearest(&data, 3, 3, 0.4, 0.4, ND), Some(1.0));
        assert_eq!(nearest(&data, 3, 3, 0.6, 0.6, ND), Some(5.0));
        assert_eq!(nearest(&data, 3, 3, 3.0, 0.0, ND), None);
        assert_eq!(nearest(&data, 3, 3, -0.7, 0.0, ND), None);
    }

    #[test]
    fn test_bilinear() {
        let data: Vec<f32> = vec![
            1.0, 2.0,
            3.0, 4.0,
        ];

        assert_eq!(bilinear(&data, 2, 2, 0.0, 0.0, ND), Some(1.0));
        assert_eq!(bilinear(&data, 2, 2, 1.0, 0.0, ND), Some(2.0));
        assert_eq!(bilinear(&data, 2, 2, 0.0, 1.0, ND), Some(3.0));
        assert_eq!(bilinear(&data, 2, 2, 1.0, 1.0, ND), Some(4.0));

        let center = bilinear(&data, 2, 2, 0.5, 0.5, ND).unwrap();
        assert!((center - 2.5).abs() < 0.001);
    }

    #[test]
    fn test_bilinear_with_nodata_falls_back_to_nearest() {
        let data: Vec<f32> = vec![
            1.0, ND,
            3.0, 4.0,
        ];

        assert_eq!(bilinear(&data, 2, 2, 0.2, 0.2, ND), Some(1.0));
        assert_eq!(bilinear(&data, 2, 2, 0.9, 0.1, ND), None);
    }

    #[test]
    fn test_cubic_reproduces_linear_ramp() {
        let data: Vec<f32> = (0..16).map(|i| (i % 4) as f32).collect();
        let v = cubic(&data, 4, 4, 1.5, 1.5, ND).unwrap();
        assert!((v - 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_nan_is_missing() {
        let data = vec![f32::NAN];
        assert_eq!(sample(ResamplingMethod::Cubic, &data, 1, 1, 0.0, 0.0, ND), None);
    }
}
