//! Test data generators for creating synthetic remote-sensing bands.
//!
//! These generators create predictable, verifiable test data patterns
//! that can be used across the test suite.

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being read/written correctly
/// by checking that grid[row][col] == col * 1000 + row.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50); // 10 * 5
/// assert_eq!(grid[0], 0.0);   // col=0, row=0 -> 0*1000 + 0
/// assert_eq!(grid[1], 1000.0); // col=1, row=0 -> 1*1000 + 0
/// assert_eq!(grid[10], 1.0);  // col=0, row=1 -> 0*1000 + 1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Creates a surface-reflectance-like band.
///
/// Values ramp linearly from `base` at the top-left to `base + span` at the
/// bottom-right, which keeps every pixel distinct and strictly positive for
/// positive `base`.
pub fn create_reflectance_grid(width: usize, height: usize, base: f32, span: f32) -> Vec<f32> {
    let denom = (width + height).saturating_sub(2).max(1) as f32;
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let t = (col + row) as f32 / denom;
            data.push(base + t * span);
        }
    }
    data
}

/// Creates a named set of reflectance bands sharing one grid.
///
/// Band `i` starts at `0.05 * (i + 1)` so normalized differences between
/// bands are non-zero.
pub fn create_band_set(names: &[&str], width: usize, height: usize) -> Vec<(String, Vec<f32>)> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            (
                name.to_string(),
                create_reflectance_grid(width, height, 0.05 * (i as f32 + 1.0), 0.3),
            )
        })
        .collect()
}

/// Creates a categorical grid of class codes.
///
/// Cycles through `classes` in row-major order; useful for checking that
/// nearest-neighbor paths never invent new codes.
pub fn create_class_grid(width: usize, height: usize, classes: &[f32]) -> Vec<f32> {
    if classes.is_empty() {
        return vec![0.0; width * height];
    }
    (0..width * height)
        .map(|i| classes[(i / width.max(1) + i % width.max(1)) % classes.len()])
        .collect()
}

/// Creates a grid filled with a constant value.
pub fn create_constant_grid(width: usize, height: usize, value: f32) -> Vec<f32> {
    vec![value; width * height]
}

/// Creates a grid with `missing` at the given (col, row) positions and
/// `fill` elsewhere.
pub fn create_grid_with_gaps(
    width: usize,
    height: usize,
    fill: f32,
    missing: f32,
    positions: &[(usize, usize)],
) -> Vec<f32> {
    let mut data = vec![fill; width * height];
    for &(col, row) in positions {
        if col < width && row < height {
            data[row * width + col] = missing;
        }
    }
    data
}
