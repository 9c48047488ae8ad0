//! Transform chains: validation and application.

use raster::{DataType, IndexFormula, RasterArtifact, ResamplingMethod};
use serde::Serialize;
use std::fmt;
use tracing::{debug, instrument};

use crate::aoi::AoiGeometry;
use crate::config::JobSpec;
use crate::error::TransformError;
use crate::registry::{VariableDescriptor, VariableKind};

pub type Result<T> = std::result::Result<T, TransformError>;

/// One raster-to-raster operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", content = "params", rename_all = "snake_case")]
pub enum TransformStep {
    /// Crop to the AOI bounding box; nodata outside the polygons.
    Clip,
    /// Warp into the job CRS at the native pixel size.
    Reproject,
    /// Warp to the job resolution.
    Resample,
    /// Replace all bands with one index band named after the variable.
    Derive(IndexFormula),
    /// Collapse the listed values and nodata into `fill`.
    Recode { values: Vec<f32>, fill: f32 },
    /// Set the logical output data type.
    Cast(DataType),
}

impl TransformStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Clip => "clip",
            Self::Reproject => "reproject",
            Self::Resample => "resample",
            Self::Derive(_) => "derive",
            Self::Recode { .. } => "recode",
            Self::Cast(_) => "cast",
        }
    }
}

impl fmt::Display for TransformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Derive(formula) => write!(f, "derive({})", formula),
            Self::Cast(data_type) => write!(f, "cast({})", data_type),
            other => f.write_str(other.name()),
        }
    }
}

/// Check a chain against the bands the extractor produces.
///
/// A derive step needs all of its inputs and leaves a single band named after
/// the variable; there is at most one. `cast` must come last.
pub fn validate_chain(variable: &str, bands: &[String], steps: &[TransformStep]) -> Result<()> {
    let malformed = |step: usize, reason: String| TransformError::MalformedChain {
        variable: variable.to_string(),
        step,
        reason,
    };

    if bands.is_empty() {
        return Err(malformed(0, "extractor declares no bands".to_string()));
    }

    let mut available: Vec<String> = bands.to_vec();
    let mut derived = false;

    for (i, step) in steps.iter().enumerate() {
        match step {
            TransformStep::Derive(formula) => {
                if derived {
                    return Err(malformed(i, "more than one derive step".to_string()));
                }
                if let Some(missing) = formula
                    .inputs()
                    .into_iter()
                    .find(|input| !available.iter().any(|b| b.eq_ignore_ascii_case(input)))
                {
                    return Err(malformed(
                        i,
                        format!(
                            "derive needs band '{}' but only [{}] are available",
                            missing,
                            available.join(", ")
                        ),
                    ));
                }
                derived = true;
                available = vec![variable.to_string()];
            }
            TransformStep::Recode { fill, .. } if !fill.is_finite() => {
                return Err(malformed(i, "recode fill value must be finite".to_string()));
            }
            TransformStep::Cast(_) if i + 1 != steps.len() => {
                return Err(malformed(i, "cast must be the last step".to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Resampling kernel for a variable: categorical data is always nearest.
pub fn resampling_for(kind: VariableKind, requested: Option<ResamplingMethod>) -> ResamplingMethod {
    match kind {
        VariableKind::Categorical => ResamplingMethod::Nearest,
        VariableKind::Continuous => requested.unwrap_or(ResamplingMethod::Bilinear),
    }
}

/// Runs a variable's transform chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformStage;

impl TransformStage {
    pub fn new() -> Self {
        Self
    }

    /// Apply `variable.chain` in order. Each step produces a new artifact.
    #[instrument(skip_all, fields(variable = %variable.name, steps = variable.chain.len()))]
    pub fn apply(
        &self,
        variable: &VariableDescriptor,
        input: RasterArtifact,
        aoi: &AoiGeometry,
        job: &JobSpec,
    ) -> Result<RasterArtifact> {
        let method = resampling_for(variable.kind, job.resampling);
        let mut current = input;

        for step in &variable.chain {
            let next = match step {
                TransformStep::Clip => raster::clip(&current, &aoi.target, aoi.target_crs),
                TransformStep::Reproject => raster::reproject(&current, job.crs, method),
                TransformStep::Resample => raster::resample(&current, job.resolution_m, method),
                TransformStep::Derive(formula) => formula.apply(&current, &variable.name, variable.nodata),
                TransformStep::Recode { values, fill } => raster::recode(&current, values, *fill),
                TransformStep::Cast(data_type) => raster::cast(&current, *data_type),
            };
            current = next.map_err(|e| TransformError::Step {
                step: step.name(),
                reason: e.to_string(),
            })?;
            debug!(
                step = %step,
                width = current.width,
                height = current.height,
                crs = %current.crs,
                "Applied transform step"
            );
        }

        Ok(current)
    }
}
