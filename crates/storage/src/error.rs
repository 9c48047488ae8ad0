//! Storage error types.

use thiserror::Error;

/// Errors raised by object storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage configuration error: {0}")]
    Config(String),

    #[error("failed to read local file {path}: {source}")]
    LocalRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("object store operation '{operation}' failed for {key}: {source}")]
    Backend {
        operation: &'static str,
        key: String,
        #[source]
        source: ::object_store::Error,
    },

    #[error("object not found: {0}")]
    NotFound(String),
}

impl StorageError {
    pub fn backend(operation: &'static str, key: &str, source: ::object_store::Error) -> Self {
        match source {
            ::object_store::Error::NotFound { .. } => Self::NotFound(key.to_string()),
            source => Self::Backend {
                operation,
                key: key.to_string(),
                source,
            },
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
