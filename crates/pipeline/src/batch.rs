//! Fan-out over a job matrix.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::JobSpec;
use crate::error::PipelineError;
use crate::orchestrator::Pipeline;
use crate::summary::RunSummary;

/// Run each job in order. A job whose AOI cannot be loaded fails on its own;
/// the remaining jobs still run.
pub async fn run_batch(
    pipeline: &Pipeline,
    jobs: &[JobSpec],
    cancel: &CancellationToken,
) -> Vec<Result<RunSummary, PipelineError>> {
    let mut results = Vec::with_capacity(jobs.len());

    for (index, job) in jobs.iter().enumerate() {
        info!(job = %job.name, index, total = jobs.len(), "Starting job");
        let result = pipeline.run(job, cancel).await;
        if let Err(e) = &result {
            error!(job = %job.name, error = %e, "Job aborted");
        }
        results.push(result);
    }

    results
}
