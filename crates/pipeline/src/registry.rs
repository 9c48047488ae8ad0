//! The closed table of variables the pipeline can produce.

use etl_common::Season;
use raster::{DataType, IndexFormula};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{TransformError, UnknownVariableError};
use crate::transform::{validate_chain, TransformStep};

/// Nodata written for continuous index outputs.
pub const INDEX_NODATA: f32 = -9999.0;

/// Fill value for CLCplus "no class" and nodata pixels.
pub const CLCPLUS_NODATA: f32 = -999.0;

const SENTINEL2_COLLECTION: &str = "COPERNICUS/S2_SR_HARMONIZED";
const EMBEDDING_COLLECTION: &str = "GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL";

const OPTICAL_SEASONS: &[Season] = &[
    Season::Winter,
    Season::Spring,
    Season::Summer,
    Season::Autumn,
    Season::Annual,
];

/// How a variable's values should be treated when resampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Continuous,
    Categorical,
}

impl VariableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::Categorical => "categorical",
        }
    }
}

/// Which data source serves a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Remote compositing service reached over HTTP
    RemoteComposite,
    /// Directory of GeoTIFFs on local disk
    LocalRaster,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteComposite => f.write_str("remote_composite"),
            Self::LocalRaster => f.write_str("local_raster"),
        }
    }
}

/// Per-pixel reduction over the images in the time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Median,
    /// First valid value in acquisition order
    Mosaic,
}

/// What to fetch and from where.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractorSpec {
    pub source: SourceKind,
    pub collection: String,
    pub bands: Vec<String>,
    pub reducer: Reducer,
    pub native_resolution_m: f64,
}

/// Years a product is available for. `last_year` of `None` means ongoing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub first_year: i32,
    pub last_year: Option<i32>,
}

impl Coverage {
    pub fn contains(&self, year: i32) -> bool {
        year >= self.first_year && self.last_year.map_or(true, |last| year <= last)
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_year {
            Some(last) => write!(f, "{}-{}", self.first_year, last),
            None => write!(f, "{}-present", self.first_year),
        }
    }
}

/// A registered variable: extraction parameters plus its transform chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableDescriptor {
    pub name: String,
    pub description: String,
    pub kind: VariableKind,
    pub extractor: ExtractorSpec,
    pub chain: Vec<TransformStep>,
    pub seasons: Vec<Season>,
    pub coverage: Coverage,
    pub data_type: DataType,
    pub nodata: f32,
}

impl VariableDescriptor {
    pub fn supports_season(&self, season: Season) -> bool {
        self.seasons.contains(&season)
    }

    /// Check the chain against the extractor's bands.
    pub fn validate(&self) -> Result<(), TransformError> {
        validate_chain(&self.name, &self.extractor.bands, &self.chain)
    }
}

/// Read-only lookup of variables by name.
#[derive(Debug, Clone)]
pub struct VariableRegistry {
    variables: Vec<VariableDescriptor>,
    /// Lowercased name to position in `variables`
    index: HashMap<String, usize>,
}

static REGISTRY: OnceLock<Result<VariableRegistry, TransformError>> = OnceLock::new();

impl VariableRegistry {
    /// Build a registry, validating every chain.
    pub fn new(variables: Vec<VariableDescriptor>) -> Result<Self, TransformError> {
        let mut index = HashMap::with_capacity(variables.len());
        for (i, variable) in variables.iter().enumerate() {
            if index.insert(variable.name.to_lowercase(), i).is_some() {
                return Err(TransformError::MalformedChain {
                    variable: variable.name.clone(),
                    step: 0,
                    reason: "variable is registered twice".to_string(),
                });
            }
            variable.validate()?;
        }
        Ok(Self { variables, index })
    }

    /// The process-wide registry of built-in variables.
    pub fn global() -> Result<&'static VariableRegistry, TransformError> {
        REGISTRY
            .get_or_init(|| Self::new(builtin_variables()))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Case-insensitive lookup.
    pub fn resolve(&self, name: &str) -> Result<&VariableDescriptor, UnknownVariableError> {
        self.index
            .get(&name.trim().to_lowercase())
            .map(|&i| &self.variables[i])
            .ok_or_else(|| {
                let mut known: Vec<String> = self.variables.iter().map(|v| v.name.clone()).collect();
                known.sort();
                UnknownVariableError {
                    name: name.to_string(),
                    known,
                }
            })
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }

    /// All descriptors in registration order.
    pub fn describe(&self) -> &[VariableDescriptor] {
        &self.variables
    }
}

fn bands(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn optical_index(
    name: &str,
    description: &str,
    band_names: &[&str],
    native_resolution_m: f64,
    formula: IndexFormula,
) -> VariableDescriptor {
    VariableDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        kind: VariableKind::Continuous,
        extractor: ExtractorSpec {
            source: SourceKind::RemoteComposite,
            collection: SENTINEL2_COLLECTION.to_string(),
            bands: bands(band_names),
            reducer: Reducer::Median,
            native_resolution_m,
        },
        chain: vec![
            TransformStep::Clip,
            TransformStep::Derive(formula),
            TransformStep::Reproject,
            TransformStep::Resample,
        ],
        seasons: OPTICAL_SEASONS.to_vec(),
        coverage: Coverage {
            first_year: 2017,
            last_year: None,
        },
        data_type: DataType::Float32,
        nodata: INDEX_NODATA,
    }
}

/// The built-in variable table.
pub fn builtin_variables() -> Vec<VariableDescriptor> {
    vec![
        optical_index(
            "ndvi",
            "Normalized difference vegetation index from Sentinel-2 NIR (B8) and red (B4)",
            &["B8", "B4"],
            10.0,
            IndexFormula::normalized_difference("B8", "B4"),
        ),
        optical_index(
            "ndmi",
            "Normalized difference moisture index from Sentinel-2 NIR (B8) and SWIR1 (B11)",
            &["B8", "B11"],
            20.0,
            IndexFormula::normalized_difference("B8", "B11"),
        ),
        optical_index(
            "msi",
            "Moisture stress index, Sentinel-2 SWIR1 (B11) over NIR (B8)",
            &["B11", "B8"],
            20.0,
            IndexFormula::ratio("B11", "B8"),
        ),
        optical_index(
            "bsi",
            "Bare soil index from Sentinel-2 SWIR1, red, NIR and blue",
            &["B11", "B4", "B8", "B2"],
            20.0,
            IndexFormula::composite(&["B11", "B4"], &["B8", "B2"]),
        ),
        VariableDescriptor {
            name: "alpha_earth".to_string(),
            description: "AlphaEarth annual satellite embedding, first axis".to_string(),
            kind: VariableKind::Continuous,
            extractor: ExtractorSpec {
                source: SourceKind::RemoteComposite,
                collection: EMBEDDING_COLLECTION.to_string(),
                bands: bands(&["A00"]),
                reducer: Reducer::Mosaic,
                native_resolution_m: 10.0,
            },
            chain: vec![TransformStep::Clip, TransformStep::Reproject, TransformStep::Resample],
            seasons: vec![Season::Static, Season::Annual],
            coverage: Coverage {
                first_year: 2017,
                last_year: None,
            },
            data_type: DataType::Float32,
            nodata: INDEX_NODATA,
        },
        VariableDescriptor {
            name: "clcplus".to_string(),
            description: "CLCplus Backbone land cover classes from local rasters".to_string(),
            kind: VariableKind::Categorical,
            extractor: ExtractorSpec {
                source: SourceKind::LocalRaster,
                collection: "clcplus".to_string(),
                bands: bands(&["class"]),
                reducer: Reducer::Mosaic,
                native_resolution_m: 10.0,
            },
            chain: vec![
                TransformStep::Clip,
                TransformStep::Reproject,
                TransformStep::Resample,
                TransformStep::Recode {
                    values: vec![0.0],
                    fill: CLCPLUS_NODATA,
                },
                TransformStep::Cast(DataType::Int32),
            ],
            seasons: vec![Season::Static],
            coverage: Coverage {
                first_year: 2018,
                last_year: Some(2023),
            },
            data_type: DataType::Int32,
            nodata: CLCPLUS_NODATA,
        },
    ]
}
