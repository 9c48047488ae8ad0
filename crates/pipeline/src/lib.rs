//! Configuration-driven extract, transform and export of remote-sensing
//! index layers.
//!
//! A run resolves a [`JobSpec`] from base and job configuration, loads the
//! AOI, then drives every requested variable through:
//!
//! 1. Extraction from a [`DataSource`], with bounded retry
//! 2. The variable's transform chain (clip, derive, reproject, resample ...)
//! 3. Export to a Cloud-Optimized GeoTIFF, optionally uploaded
//!
//! and returns a [`RunSummary`] with one [`OutputRecord`] per variable.

pub mod aoi;
pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod naming;
pub mod orchestrator;
pub mod registry;
pub mod summary;
pub mod transform;

pub use aoi::{load_aoi, parse_aoi, AoiGeometry};
pub use batch::run_batch;
pub use config::{
    load_tree, resolve, resolve_matrix, CogSettings, JobSpec, SourceSettings, StorageTarget,
};
pub use error::{
    AoiError, ConfigError, ErrorKind, ExportError, ExtractionError, PipelineError, TransformError,
    UnknownVariableError, VariableError,
};
pub use export::{ExportReceipt, ExportStage};
pub use extract::{
    DataSource, ExtractRequest, Extraction, ExtractionStage, HttpRasterSource, LocalRasterSource,
    RetryPolicy, RetryState,
};
pub use naming::{output_filename, slugify};
pub use orchestrator::{Exporter, Extractor, Pipeline, ProgressEvent, RasterTransformer, Stage};
pub use registry::{VariableDescriptor, VariableKind, VariableRegistry};
pub use summary::{OutputRecord, OutputStatus, RunSummary};
pub use transform::{validate_chain, TransformStage, TransformStep};
