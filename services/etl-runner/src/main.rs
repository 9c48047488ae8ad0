//! Spatial index ETL runner.
//!
//! Resolves a base and job configuration into one or more jobs, runs every
//! requested variable through extraction, transformation and COG export, and
//! prints a per-variable report.

mod report;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use pipeline::{load_tree, resolve_matrix, run_batch, JobSpec, Pipeline, StorageTarget, VariableRegistry};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use storage::{ObjectStorage, ObjectStorageConfig, ObjectUploader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Parser, Debug)]
#[command(name = "etl-runner")]
#[command(about = "Extract, transform and export remote-sensing index layers as COGs")]
struct Args {
    /// Base configuration with project defaults
    #[arg(short, long, env = "ETL_BASE_CONFIG")]
    base: Option<PathBuf>,

    /// Job configuration
    #[arg(short, long, env = "ETL_JOB_CONFIG")]
    job: Option<PathBuf>,

    /// Override the number of variables processed concurrently
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=64))]
    workers: Option<u16>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Resolve and print the jobs without running them
    #[arg(long)]
    dry_run: bool,

    /// List the registered variables and exit
    #[arg(long)]
    list_variables: bool,

    /// Service-account key for GCS uploads
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    service_account: Option<String>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", env = "ETL_LOG_FORMAT")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format);

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Run aborted");
            eprintln!("error: {:#}", e);
            ExitCode::from(report::EXIT_FATAL)
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn run(args: Args) -> Result<u8> {
    if args.list_variables {
        let registry = VariableRegistry::global()?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(registry.describe())?);
        } else {
            print!("{}", report::render_variables(registry.describe()));
        }
        return Ok(report::EXIT_OK);
    }

    let Some(job_path) = &args.job else {
        bail!("--job is required unless --list-variables is given");
    };

    let base = match &args.base {
        Some(path) => load_tree(path).with_context(|| format!("loading base config {}", path.display()))?,
        None => serde_yaml::Value::Mapping(Default::default()),
    };
    let job = load_tree(job_path).with_context(|| format!("loading job config {}", job_path.display()))?;

    let mut jobs = resolve_matrix(&base, &job)?;
    if let Some(workers) = args.workers {
        for spec in &mut jobs {
            spec.workers = usize::from(workers);
        }
    }
    info!(jobs = jobs.len(), "Resolved configuration");

    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(report::EXIT_OK);
    }

    let Some(first) = jobs.first() else {
        bail!("configuration expanded to no jobs");
    };
    let uploader = uploader_for(first, args.service_account.as_deref())?;
    let pipeline = Pipeline::for_job(first, uploader)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing variables in flight");
            on_signal.cancel();
        }
    });

    let results = run_batch(&pipeline, &jobs, &cancel).await;

    if args.json {
        let reports = report::job_reports(&jobs, &results);
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print!("{}", report::render_text(&jobs, &results));
    }

    Ok(report::exit_status(&results))
}

/// Object storage client for `gcs_cog` targets.
fn uploader_for(job: &JobSpec, service_account: Option<&str>) -> Result<Option<Arc<dyn ObjectUploader>>> {
    match &job.storage {
        StorageTarget::LocalCog { .. } => Ok(None),
        StorageTarget::GcsCog { bucket, .. } => {
            let config = ObjectStorageConfig {
                bucket: bucket.clone(),
                service_account_path: service_account.map(String::from),
            };
            let storage = ObjectStorage::gcs(&config).with_context(|| format!("connecting to bucket {}", bucket))?;
            Ok(Some(Arc::new(storage)))
        }
    }
}
