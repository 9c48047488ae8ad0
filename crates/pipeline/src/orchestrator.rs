//! Runs every requested variable through extract, transform and export.
//!
//! Variables are independent: each owns its raster chain and ends in exactly
//! one [`OutputRecord`]. A failing variable never stops the others. Records
//! come back in request order whatever the completion order.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use raster::RasterArtifact;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use storage::ObjectUploader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::aoi::{load_aoi, AoiGeometry};
use crate::config::JobSpec;
use crate::error::{ConfigError, ExportError, ExtractionError, PipelineError, TransformError, VariableError};
use crate::export::{ExportReceipt, ExportStage};
use crate::extract::{Extraction, ExtractionStage};
use crate::registry::{VariableDescriptor, VariableRegistry};
use crate::summary::{OutputRecord, OutputStatus, RunSummary};
use crate::transform::TransformStage;

// ============================================================================
// Stage seams
// ============================================================================

/// Fetches the raw raster for a variable.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        variable: &VariableDescriptor,
        aoi: &AoiGeometry,
        job: &JobSpec,
        cancel: &CancellationToken,
    ) -> Result<Extraction, ExtractionError>;
}

/// Applies a variable's transform chain. Runs on a blocking thread.
pub trait RasterTransformer: Send + Sync {
    fn transform(
        &self,
        variable: &VariableDescriptor,
        raster: RasterArtifact,
        aoi: &AoiGeometry,
        job: &JobSpec,
    ) -> Result<RasterArtifact, TransformError>;
}

/// Writes and publishes the final raster.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(
        &self,
        variable: &VariableDescriptor,
        raster: RasterArtifact,
        aoi: &AoiGeometry,
        job: &JobSpec,
    ) -> Result<ExportReceipt, ExportError>;
}

#[async_trait]
impl Extractor for ExtractionStage {
    async fn extract(
        &self,
        variable: &VariableDescriptor,
        aoi: &AoiGeometry,
        job: &JobSpec,
        cancel: &CancellationToken,
    ) -> Result<Extraction, ExtractionError> {
        ExtractionStage::extract(self, variable, aoi, job, cancel).await
    }
}

impl RasterTransformer for TransformStage {
    fn transform(
        &self,
        variable: &VariableDescriptor,
        raster: RasterArtifact,
        aoi: &AoiGeometry,
        job: &JobSpec,
    ) -> Result<RasterArtifact, TransformError> {
        self.apply(variable, raster, aoi, job)
    }
}

#[async_trait]
impl Exporter for ExportStage {
    async fn export(
        &self,
        variable: &VariableDescriptor,
        raster: RasterArtifact,
        aoi: &AoiGeometry,
        job: &JobSpec,
    ) -> Result<ExportReceipt, ExportError> {
        ExportStage::export(self, variable, raster, aoi, job).await
    }
}

// ============================================================================
// Progress
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Transform,
    Export,
}

/// Progress notifications. Delivery is best effort.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted { job: String, variables: usize },
    StageStarted { variable: String, stage: Stage },
    VariableFinished { variable: String, status: OutputStatus },
    RunFinished { job: String, cancelled: bool },
}

// ============================================================================
// Pipeline
// ============================================================================

/// Per-variable plan resolved before any extraction starts.
type Plan = (String, Result<&'static VariableDescriptor, VariableError>);

pub struct Pipeline {
    registry: &'static VariableRegistry,
    extractor: Arc<dyn Extractor>,
    transformer: Arc<dyn RasterTransformer>,
    exporter: Arc<dyn Exporter>,
    progress: Option<mpsc::Sender<ProgressEvent>>,
}

impl Pipeline {
    pub fn new(
        registry: &'static VariableRegistry,
        extractor: Arc<dyn Extractor>,
        transformer: Arc<dyn RasterTransformer>,
        exporter: Arc<dyn Exporter>,
    ) -> Self {
        Self {
            registry,
            extractor,
            transformer,
            exporter,
            progress: None,
        }
    }

    /// Pipeline with the built-in registry and the real stages configured
    /// from `job`'s source settings.
    pub fn for_job(job: &JobSpec, uploader: Option<Arc<dyn ObjectUploader>>) -> Result<Self, PipelineError> {
        let registry = VariableRegistry::global()?;
        let extractor = ExtractionStage::from_settings(&job.source)
            .map_err(|e| ConfigError::invalid("source.endpoint", e.to_string()))?;
        let exporter = match uploader {
            Some(uploader) => ExportStage::new().with_uploader(uploader),
            None => ExportStage::new(),
        };

        Ok(Self::new(
            registry,
            Arc::new(extractor),
            Arc::new(TransformStage::new()),
            Arc::new(exporter),
        ))
    }

    /// Send [`ProgressEvent`]s to `tx`. A full or closed channel only drops events.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn registry(&self) -> &'static VariableRegistry {
        self.registry
    }

    /// Load the AOI and run every variable of `job`.
    ///
    /// Fails only when the AOI cannot be loaded; per-variable failures are
    /// recorded in the summary.
    #[instrument(skip_all, fields(job = %job.name, year = job.year, season = %job.season))]
    pub async fn run(&self, job: &JobSpec, cancel: &CancellationToken) -> Result<RunSummary, PipelineError> {
        let aoi = load_aoi(&job.aoi, job.crs)?;
        Ok(self.run_with_aoi(job, Arc::new(aoi), cancel).await)
    }

    /// Run every variable of `job` against an already loaded AOI.
    pub async fn run_with_aoi(&self, job: &JobSpec, aoi: Arc<AoiGeometry>, cancel: &CancellationToken) -> RunSummary {
        let started = Instant::now();
        let job = Arc::new(job.clone());

        // Chains are checked for every variable before the first extraction.
        let plans: Vec<Plan> = job
            .variables
            .iter()
            .map(|name| (name.clone(), self.plan(name)))
            .collect();

        info!(
            aoi = %aoi.slug,
            variables = plans.len(),
            workers = job.workers,
            "Starting run"
        );
        self.emit(ProgressEvent::RunStarted {
            job: job.name.clone(),
            variables: plans.len(),
        });

        let records: Vec<OutputRecord> = stream::iter(plans)
            .map(|(name, plan)| {
                let job = Arc::clone(&job);
                let aoi = Arc::clone(&aoi);
                async move { self.run_variable(name, plan, job, aoi, cancel).await }
            })
            .buffered(job.workers.max(1))
            .collect()
            .await;

        let summary = RunSummary {
            job: job.name.clone(),
            aoi: aoi.name.clone(),
            year: job.year,
            season: job.season.to_string(),
            records,
            cancelled: cancel.is_cancelled(),
        };

        info!(
            succeeded = summary.count(OutputStatus::Success),
            failed = summary.count(OutputStatus::Failed),
            skipped = summary.count(OutputStatus::Skipped),
            cancelled = summary.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run complete"
        );
        self.emit(ProgressEvent::RunFinished {
            job: summary.job.clone(),
            cancelled: summary.cancelled,
        });

        summary
    }

    fn plan(&self, name: &str) -> Result<&'static VariableDescriptor, VariableError> {
        let descriptor = self.registry.resolve(name)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    async fn run_variable(
        &self,
        name: String,
        plan: Result<&'static VariableDescriptor, VariableError>,
        job: Arc<JobSpec>,
        aoi: Arc<AoiGeometry>,
        cancel: &CancellationToken,
    ) -> OutputRecord {
        let started = Instant::now();

        let record = match plan {
            Err(err) => OutputRecord::failed(&name, &err, 0, elapsed_ms(started)),
            Ok(_) if cancel.is_cancelled() => {
                debug!(variable = %name, "Run cancelled; skipping variable");
                OutputRecord::skipped(&name)
            }
            Ok(descriptor) => match self.execute(&name, descriptor, &job, &aoi, cancel).await {
                Ok((receipt, retries, observations)) => {
                    OutputRecord::success(&name, receipt, retries, observations, elapsed_ms(started))
                }
                Err((VariableError::Extraction(ExtractionError::Cancelled), _)) => OutputRecord::skipped(&name),
                Err((err, retries)) => OutputRecord::failed(&name, &err, retries, elapsed_ms(started)),
            },
        };

        match record.status {
            OutputStatus::Failed => error!(
                variable = %name,
                kind = ?record.error_kind,
                error = record.error.as_deref().unwrap_or_default(),
                "Variable failed"
            ),
            OutputStatus::Skipped => warn!(variable = %name, "Variable skipped"),
            OutputStatus::Success => info!(
                variable = %name,
                location = record.location().as_deref().unwrap_or_default(),
                retries = record.retries,
                "Variable exported"
            ),
        }

        counter!("etl_variables_total", "status" => record.status.as_str()).increment(1);
        histogram!("etl_variable_duration_seconds").record(started.elapsed().as_secs_f64());
        self.emit(ProgressEvent::VariableFinished {
            variable: name,
            status: record.status,
        });

        record
    }

    /// Extract, transform and export one variable. Errors carry the number of
    /// retries spent so far.
    async fn execute(
        &self,
        name: &str,
        descriptor: &'static VariableDescriptor,
        job: &Arc<JobSpec>,
        aoi: &Arc<AoiGeometry>,
        cancel: &CancellationToken,
    ) -> Result<(ExportReceipt, u32, u32), (VariableError, u32)> {
        self.emit_stage(name, Stage::Extract);
        let Extraction { raster, retries } = self
            .extractor
            .extract(descriptor, aoi, job, cancel)
            .await
            .map_err(|e| {
                let retries = retries_spent(&e);
                (VariableError::from(e), retries)
            })?;
        let observations = raster.observations;

        self.emit_stage(name, Stage::Transform);
        let transformer = Arc::clone(&self.transformer);
        let (task_job, task_aoi) = (Arc::clone(job), Arc::clone(aoi));
        let transformed = tokio::task::spawn_blocking(move || {
            transformer.transform(descriptor, raster, &task_aoi, &task_job)
        })
        .await
        .map_err(|e| (VariableError::Internal(format!("transform task failed: {}", e)), retries))?
        .map_err(|e| (VariableError::from(e), retries))?;

        self.emit_stage(name, Stage::Export);
        let receipt = self
            .exporter
            .export(descriptor, transformed, aoi, job)
            .await
            .map_err(|e| (VariableError::from(e), retries))?;

        Ok((receipt, retries, observations))
    }

    fn emit_stage(&self, variable: &str, stage: Stage) {
        self.emit(ProgressEvent::StageStarted {
            variable: variable.to_string(),
            stage,
        });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            if let Err(e) = tx.try_send(event) {
                debug!(error = %e, "Progress event dropped");
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Retries used by a failed extraction.
fn retries_spent(err: &ExtractionError) -> u32 {
    match err {
        ExtractionError::RetriesExhausted { attempts, .. } => attempts.saturating_sub(1),
        _ => 0,
    }
}
