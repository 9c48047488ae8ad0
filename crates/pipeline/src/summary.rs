//! Per-variable outcome records and the run summary.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::error::{ErrorKind, VariableError};
use crate::export::ExportReceipt;

/// Final status of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    Success,
    Failed,
    /// The run was cancelled before the variable started extracting.
    Skipped,
}

impl OutputStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for OutputStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one requested variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    /// Variable name as requested
    pub variable: String,
    pub status: OutputStatus,
    pub local_path: Option<PathBuf>,
    pub remote_uri: Option<String>,
    pub bytes: Option<u64>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub retries: u32,
    pub observations: Option<u32>,
    pub duration_ms: u64,
}

impl OutputRecord {
    pub fn success(variable: &str, receipt: ExportReceipt, retries: u32, observations: u32, duration_ms: u64) -> Self {
        Self {
            variable: variable.to_string(),
            status: OutputStatus::Success,
            local_path: Some(receipt.local_path),
            remote_uri: receipt.remote_uri,
            bytes: Some(receipt.bytes),
            error_kind: None,
            error: None,
            retries,
            observations: Some(observations),
            duration_ms,
        }
    }

    pub fn failed(variable: &str, error: &VariableError, retries: u32, duration_ms: u64) -> Self {
        Self {
            variable: variable.to_string(),
            status: OutputStatus::Failed,
            local_path: error.kept_file().map(PathBuf::from),
            remote_uri: None,
            bytes: None,
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
            retries,
            observations: None,
            duration_ms,
        }
    }

    pub fn skipped(variable: &str) -> Self {
        Self {
            variable: variable.to_string(),
            status: OutputStatus::Skipped,
            local_path: None,
            remote_uri: None,
            bytes: None,
            error_kind: None,
            error: None,
            retries: 0,
            observations: None,
            duration_ms: 0,
        }
    }

    /// Local path or remote URI, whichever is the published location.
    pub fn location(&self) -> Option<String> {
        self.remote_uri
            .clone()
            .or_else(|| self.local_path.as_ref().map(|p| p.display().to_string()))
    }
}

/// Result of a whole run, records in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Job name
    pub job: String,
    pub aoi: String,
    pub year: i32,
    pub season: String,
    pub records: Vec<OutputRecord>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn count(&self, status: OutputStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.records.iter().all(|r| r.status == OutputStatus::Success)
    }

    pub fn record(&self, variable: &str) -> Option<&OutputRecord> {
        self.records.iter().find(|r| r.variable == variable)
    }
}
