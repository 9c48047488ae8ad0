//! Error taxonomy for pipeline runs.
//!
//! [`ConfigError`] and [`AoiError`] abort a run before any variable starts.
//! Everything else is scoped to one variable and ends up in its
//! [`OutputRecord`](crate::summary::OutputRecord).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bad or missing configuration input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required key '{0}'")]
    MissingKey(String),

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("environment variable {0} not set")]
    MissingEnv(String),

    #[error("unclosed variable substitution: ${{{0}")]
    UnclosedSubstitution(String),
}

impl ConfigError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Dotted key the error refers to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::MissingKey(key) | Self::InvalidValue { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// The AOI cannot be loaded, interpreted or reprojected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AoiError {
    #[error("failed to read AOI {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("unsupported AOI format '{0}'; expected .geojson or .json")]
    UnsupportedFormat(String),

    #[error("invalid GeoJSON: {0}")]
    Parse(String),

    #[error("AOI declares no CRS and its coordinates are not lon/lat")]
    MissingCrs,

    #[error("unsupported AOI CRS: {0}")]
    UnsupportedCrs(String),

    #[error("failed to reproject AOI from {from} to {to}: {reason}")]
    Projection {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid AOI geometry ({stage}): {reason}")]
    InvalidGeometry { stage: &'static str, reason: String },
}

/// A requested variable is not in the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown variable '{name}'; known variables: {}", known.join(", "))]
pub struct UnknownVariableError {
    pub name: String,
    pub known: Vec<String>,
}

/// Failure to obtain raw raster data from a source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by data source: {0}")]
    RateLimited(String),

    #[error("data source error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("AOI exceeds the export limit: {0}")]
    TooLarge(String),

    #[error("request not authenticated: {0}")]
    Unauthenticated(String),

    #[error("unsupported request: {0}")]
    Unsupported(String),

    #[error("invalid response from data source: {0}")]
    InvalidResponse(String),

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ExtractionError>,
    },

    #[error("cancelled while waiting to retry")]
    Cancelled,
}

impl ExtractionError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited(_) | Self::Server { .. } | Self::Connection(_)
        )
    }

    /// Classify an HTTP status returned by a data source.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Unauthenticated(message),
            404 | 422 => Self::Unsupported(message),
            408 | 504 => Self::Timeout(message),
            413 => Self::TooLarge(message),
            429 => Self::RateLimited(message),
            500..=599 => Self::Server { status, message },
            _ => Self::InvalidResponse(format!("HTTP {}: {}", status, message)),
        }
    }
}

/// A transform chain is malformed or a step failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("malformed transform chain for '{variable}' at step {step}: {reason}")]
    MalformedChain {
        variable: String,
        step: usize,
        reason: String,
    },

    #[error("transform step '{step}' failed: {reason}")]
    Step { step: &'static str, reason: String },
}

/// Failure to write or publish the output COG.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExportError {
    #[error("failed to write {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("COG encoding failed: {0}")]
    Encode(String),

    /// The COG was written but not published; it stays at `local_path`.
    #[error("upload failed: {reason} (kept {})", .local_path.display())]
    Upload { local_path: PathBuf, reason: String },

    #[error("size mismatch for {uri}: local {local} bytes, remote {remote} bytes (kept {})", .local_path.display())]
    SizeMismatch {
        uri: String,
        local: u64,
        remote: u64,
        local_path: PathBuf,
    },
}

impl ExportError {
    /// Local COG left behind for inspection, if any.
    pub fn kept_file(&self) -> Option<&Path> {
        match self {
            Self::Upload { local_path, .. } | Self::SizeMismatch { local_path, .. } => Some(local_path),
            Self::Io { .. } | Self::Encode(_) => None,
        }
    }

    pub fn io(path: &std::path::Path, err: impl fmt::Display) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Any error scoped to a single variable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VariableError {
    #[error(transparent)]
    UnknownVariable(#[from] UnknownVariableError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Export(#[from] ExportError),

    /// A worker task panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VariableError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownVariable(_) => ErrorKind::UnknownVariable,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::Transform(_) => ErrorKind::Transform,
            Self::Export(_) => ErrorKind::Export,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn kept_file(&self) -> Option<&Path> {
        match self {
            Self::Export(e) => e.kept_file(),
            _ => None,
        }
    }
}

/// Error category recorded in run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "UnknownVariableError")]
    UnknownVariable,
    #[serde(rename = "ExtractionError")]
    Extraction,
    #[serde(rename = "TransformError")]
    Transform,
    #[serde(rename = "ExportError")]
    Export,
    #[serde(rename = "InternalError")]
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnknownVariable => "UnknownVariableError",
            Self::Extraction => "ExtractionError",
            Self::Transform => "TransformError",
            Self::Export => "ExportError",
            Self::Internal => "InternalError",
        };
        f.write_str(s)
    }
}

/// Errors that abort a whole run; no summary is produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("AOI error: {0}")]
    Aoi(#[from] AoiError),

    #[error("variable registry is invalid: {0}")]
    Registry(#[from] TransformError),
}
