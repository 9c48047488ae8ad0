//! Extraction stage: fetch raw rasters from a data source with bounded retry.

mod http;
mod local;
mod retry;

pub use http::{HttpRasterSource, RasterMeta, RASTER_META_HEADER};
pub use local::LocalRasterSource;
pub use retry::{AttemptOutcome, RetryPolicy, RetryState};

use async_trait::async_trait;
use etl_common::{CrsCode, TimeWindow};
use metrics::counter;
use raster::{RasterArtifact, METERS_PER_DEGREE};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::aoi::AoiGeometry;
use crate::config::{JobSpec, SourceSettings};
use crate::error::ExtractionError;
use crate::registry::{SourceKind, VariableDescriptor};

pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Everything a data source needs for one fetch.
#[derive(Debug, Clone, Copy)]
pub struct ExtractRequest<'a> {
    pub variable: &'a VariableDescriptor,
    pub aoi: &'a AoiGeometry,
    /// `None` for variables without a temporal dimension
    pub window: Option<TimeWindow>,
    pub year: i32,
    /// CRS the source should deliver in
    pub crs: CrsCode,
}

/// A source of raw raster data.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// One attempt. Errors are classified by [`ExtractionError::is_transient`].
    async fn fetch(&self, request: &ExtractRequest<'_>) -> Result<RasterArtifact>;
}

/// Raw raster plus what it took to get it.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub raster: RasterArtifact,
    pub retries: u32,
}

/// Dispatches extraction requests to the source registered for each
/// variable's [`SourceKind`].
#[derive(Clone, Default)]
pub struct ExtractionStage {
    sources: HashMap<SourceKind, Arc<dyn DataSource>>,
}

impl ExtractionStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the stage from job settings: an HTTP source when an endpoint is
    /// configured and a local source when a CLCplus directory is.
    pub fn from_settings(settings: &SourceSettings) -> Result<Self> {
        let mut stage = Self::new();
        if let Some(endpoint) = &settings.endpoint {
            stage = stage.with_source(
                SourceKind::RemoteComposite,
                Arc::new(HttpRasterSource::new(endpoint, settings.timeout_secs)?),
            );
        }
        if let Some(dir) = &settings.clcplus_dir {
            stage = stage.with_source(SourceKind::LocalRaster, Arc::new(LocalRasterSource::new(dir)));
        }
        Ok(stage)
    }

    pub fn with_source(mut self, kind: SourceKind, source: Arc<dyn DataSource>) -> Self {
        self.sources.insert(kind, source);
        self
    }

    /// Fetch the raw raster for one variable.
    ///
    /// Season, year and the export pixel limit are checked locally first, so
    /// requests that cannot succeed never reach the source.
    #[instrument(skip_all, fields(variable = %variable.name, aoi = %aoi.slug, year = job.year, season = %job.season))]
    pub async fn extract(
        &self,
        variable: &VariableDescriptor,
        aoi: &AoiGeometry,
        job: &JobSpec,
        cancel: &CancellationToken,
    ) -> Result<Extraction> {
        check_request(variable, aoi, job)?;

        let kind = variable.extractor.source;
        let source = self.sources.get(&kind).ok_or_else(|| {
            ExtractionError::Unsupported(format!(
                "no {} data source configured for '{}'",
                kind, variable.name
            ))
        })?;

        let request = ExtractRequest {
            variable,
            aoi,
            window: job.window(),
            year: job.year,
            crs: job.crs,
        };

        let (raster, retries) = retry_with_backoff(&job.retry, cancel, |_| source.fetch(&request)).await?;

        info!(
            width = raster.width,
            height = raster.height,
            observations = raster.observations,
            retries,
            "Extraction complete"
        );

        Ok(Extraction { raster, retries })
    }
}

/// Reject requests the source cannot serve.
pub fn check_request(variable: &VariableDescriptor, aoi: &AoiGeometry, job: &JobSpec) -> Result<()> {
    if !variable.supports_season(job.season) {
        let seasons: Vec<&str> = variable.seasons.iter().map(|s| s.as_str()).collect();
        return Err(ExtractionError::Unsupported(format!(
            "'{}' is not available for season '{}'; supported: {}",
            variable.name,
            job.season,
            seasons.join(", ")
        )));
    }

    if !variable.coverage.contains(job.year) {
        return Err(ExtractionError::Unsupported(format!(
            "'{}' covers {}; {} requested",
            variable.name, variable.coverage, job.year
        )));
    }

    if variable.extractor.source == SourceKind::RemoteComposite {
        let pixels = estimated_pixels(aoi, variable.extractor.native_resolution_m);
        if pixels > job.source.max_pixels {
            return Err(ExtractionError::TooLarge(format!(
                "{} pixels at {} m exceeds the limit of {}",
                pixels, variable.extractor.native_resolution_m, job.source.max_pixels
            )));
        }
    }

    Ok(())
}

/// Pixels covering the AOI bounding box at `resolution_m`.
pub fn estimated_pixels(aoi: &AoiGeometry, resolution_m: f64) -> u64 {
    let res = if aoi.target_crs.is_geographic() {
        resolution_m / METERS_PER_DEGREE
    } else {
        resolution_m
    };
    let cols = (aoi.bbox.width() / res).ceil().max(1.0);
    let rows = (aoi.bbox.height() / res).ceil().max(1.0);
    (cols * rows).min(u64::MAX as f64) as u64
}

/// Run `operation` until it succeeds, fails permanently or the retry budget
/// is spent. Returns the value and the number of retries used.
///
/// Cancellation is honoured while backing off.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<(T, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut state = RetryState::start();

    loop {
        state = match state {
            RetryState::Attempting { attempt } => {
                counter!("etl_extraction_attempts_total").increment(1);
                match operation(attempt).await {
                    Ok(value) => {
                        debug!(attempt, "Attempt succeeded");
                        return Ok((value, attempt));
                    }
                    Err(err) => {
                        let outcome = if err.is_transient() {
                            AttemptOutcome::Transient
                        } else {
                            AttemptOutcome::Permanent
                        };
                        match state.on_outcome(outcome, policy) {
                            RetryState::FailedTransientExhausted { attempts } => {
                                return Err(ExtractionError::RetriesExhausted {
                                    attempts,
                                    last: Box::new(err),
                                });
                            }
                            RetryState::FailedPermanent { .. } => return Err(err),
                            next => {
                                warn!(
                                    attempt,
                                    error = %err,
                                    "Transient extraction failure, retrying"
                                );
                                next
                            }
                        }
                    }
                }
            }
            RetryState::BackingOff { retry, delay } => {
                counter!("etl_extraction_retries_total").increment(1);
                debug!(retry, delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExtractionError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                state.on_backoff_elapsed()
            }
            terminal => {
                return Err(ExtractionError::InvalidResponse(format!(
                    "retry loop stopped in state {:?}",
                    terminal
                )))
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_policy(5), &CancellationToken::new(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(ExtractionError::Timeout("slow".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, (42, 3));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = retry_with_backoff::<(), _, _>(&fast_policy(5), &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ExtractionError::Unauthenticated("no token".into())) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractionError::Unauthenticated(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let err = retry_with_backoff::<(), _, _>(&fast_policy(2), &CancellationToken::new(), |_| async {
            Err(ExtractionError::RateLimited("429".into()))
        })
        .await
        .unwrap_err();

        match err {
            ExtractionError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ExtractionError::RateLimited(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 60_000,
            max_backoff_ms: 60_000,
        };
        let err = retry_with_backoff::<(), _, _>(&policy, &cancel, |_| async {
            Err(ExtractionError::Connection("reset".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(err, ExtractionError::Cancelled);
    }
}
