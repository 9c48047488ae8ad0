//! Shared test utilities for the spatial ETL workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic band generators (reflectance, class codes, ramps)
//! - AOI GeoJSON and configuration fixtures
//! - Approximate-equality assertion macros
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, create_reflectance_grid};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Asserts that two numbers are within `epsilon` of each other.
///
/// Both sides are widened to `f64`, so `f32` samples and `f64` coordinates
/// can be compared directly.
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(0.3333_f32, 1.0 / 3.0, 1e-3);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let (left, right, epsilon) = ($left as f64, $right as f64, $epsilon as f64);
        if !((left - right).abs() <= epsilon) {
            panic!(
                "assertion failed: `left ≈ right` (±{:?})\n  left: {:?}\n right: {:?}",
                epsilon, left, right
            );
        }
    }};
}

/// Asserts that two `(min_x, min_y, max_x, max_y)` envelopes agree corner by
/// corner within `epsilon`.
///
/// ```ignore
/// use test_utils::assert_envelope_approx_eq;
///
/// assert_envelope_approx_eq!((bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y), (13.3, 52.5, 13.32, 52.51), 1e-6);
/// ```
#[macro_export]
macro_rules! assert_envelope_approx_eq {
    (($a0:expr, $a1:expr, $a2:expr, $a3:expr), ($b0:expr, $b1:expr, $b2:expr, $b3:expr), $epsilon:expr) => {{
        $crate::assert_approx_eq!($a0, $b0, $epsilon);
        $crate::assert_approx_eq!($a1, $b1, $epsilon);
        $crate::assert_approx_eq!($a2, $b2, $epsilon);
        $crate::assert_approx_eq!($a3, $b3, $epsilon);
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_approx_eq_mixed_widths() {
        assert_approx_eq!(0.1_f32, 0.1_f64, 1e-7);
        assert_approx_eq!(-9999.0_f32, -9999, 0.0);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_approx_eq_rejects_nan() {
        assert_approx_eq!(f32::NAN, 0.0, 1.0);
    }

    #[test]
    fn test_envelope_approx_eq() {
        assert_envelope_approx_eq!((0.0, 1.0, 2.0, 3.0), (1e-9, 1.0, 2.0, 3.0 - 1e-9), 1e-6);
    }
}
