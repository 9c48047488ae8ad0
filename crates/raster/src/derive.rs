//! Spectral index derivation.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::types::{Band, DataType, RasterArtifact};

/// Denominators with a magnitude at or below this produce nodata.
pub const DENOMINATOR_EPSILON: f32 = 1e-10;

/// Index formulas the derive step can compute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexFormula {
    /// `(a - b) / (a + b)`
    NormalizedDifference { a: String, b: String },
    /// `numerator / denominator`
    Ratio {
        numerator: String,
        denominator: String,
    },
    /// `(Σpositive - Σnegative) / (Σpositive + Σnegative)`
    CompositeNormalizedDifference {
        positive: Vec<String>,
        negative: Vec<String>,
    },
}

impl IndexFormula {
    pub fn normalized_difference(a: &str, b: &str) -> Self {
        Self::NormalizedDifference {
            a: a.to_string(),
            b: b.to_string(),
        }
    }

    pub fn ratio(numerator: &str, denominator: &str) -> Self {
        Self::Ratio {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }

    pub fn composite(positive: &[&str], negative: &[&str]) -> Self {
        Self::CompositeNormalizedDifference {
            positive: positive.iter().map(|s| s.to_string()).collect(),
            negative: negative.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Band names the formula reads.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Self::NormalizedDifference { a, b } => vec![a.as_str(), b.as_str()],
            Self::Ratio {
                numerator,
                denominator,
            } => vec![numerator.as_str(), denominator.as_str()],
            Self::CompositeNormalizedDifference { positive, negative } => positive
                .iter()
                .chain(negative.iter())
                .map(String::as_str)
                .collect(),
        }
    }

    /// Split the inputs into numerator-positive and numerator-negative groups.
    fn groups(&self) -> (Vec<&str>, Vec<&str>) {
        match self {
            Self::NormalizedDifference { a, b } => (vec![a.as_str()], vec![b.as_str()]),
            Self::Ratio {
                numerator,
                denominator,
            } => (vec![numerator.as_str()], vec![denominator.as_str()]),
            Self::CompositeNormalizedDifference { positive, negative } => (
                positive.iter().map(String::as_str).collect(),
                negative.iter().map(String::as_str).collect(),
            ),
        }
    }

    /// Compute the index into a single band called `output`, tagged with the
    /// `nodata` sentinel regardless of the source's.
    ///
    /// A pixel is nodata when any input is missing, when the denominator is
    /// within [`DENOMINATOR_EPSILON`] of zero, or when the result would not be
    /// finite. NaN and infinity never reach the output unless `nodata` is NaN.
    pub fn apply(&self, src: &RasterArtifact, output: &str, nodata: f32) -> Result<RasterArtifact> {
        let (pos_names, neg_names) = self.groups();
        let pos = pos_names
            .iter()
            .map(|n| src.band(n).map(|b| b.data.as_slice()))
            .collect::<Result<Vec<_>>>()?;
        let neg = neg_names
            .iter()
            .map(|n| src.band(n).map(|b| b.data.as_slice()))
            .collect::<Result<Vec<_>>>()?;

        let is_ratio = matches!(self, Self::Ratio { .. });

        let data: Vec<f32> = (0..src.width * src.height)
            .into_par_iter()
            .map(|i| {
                let mut p = 0.0f32;
                for band in &pos {
                    let v = band[i];
                    if src.is_nodata(v) {
                        return nodata;
                    }
                    p += v;
                }
                let mut n = 0.0f32;
                for band in &neg {
                    let v = band[i];
                    if src.is_nodata(v) {
                        return nodata;
                    }
                    n += v;
                }

                let (num, den) = if is_ratio { (p, n) } else { (p - n, p + n) };
                if den.abs() <= DENOMINATOR_EPSILON {
                    return nodata;
                }
                let value = num / den;
                if value.is_finite() {
                    value
                } else {
                    nodata
                }
            })
            .collect();

        let mut out = src.with_grid(
            vec![Band::new(output, data)],
            src.width,
            src.height,
            src.transform,
            src.crs,
        )?;
        out.data_type = DataType::Float32;
        out.nodata = nodata;
        Ok(out)
    }
}

impl fmt::Display for IndexFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NormalizedDifference { a, b } => write!(f, "({a} - {b}) / ({a} + {b})"),
            Self::Ratio {
                numerator,
                denominator,
            } => write!(f, "{numerator} / {denominator}"),
            Self::CompositeNormalizedDifference { positive, negative } => {
                let p = positive.join(" + ");
                let n = negative.join(" + ");
                write!(f, "(({p}) - ({n})) / (({p}) + ({n}))")
            }
        }
    }
}
