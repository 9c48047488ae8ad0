//! Object storage client for exported rasters (GCS or in-memory).

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{gcp::GoogleCloudStorageBuilder, memory::InMemory, path::Path, ObjectStore};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{StorageError, StorageResult};

/// Configuration for a GCS bucket.
///
/// Credentials are taken from the environment (`GOOGLE_SERVICE_ACCOUNT`,
/// `GOOGLE_APPLICATION_CREDENTIALS`, ...) unless a key file is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStorageConfig {
    /// Bucket name without the `gs://` scheme
    pub bucket: String,
    /// Optional service-account key file
    pub service_account_path: Option<String>,
}

impl ObjectStorageConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            service_account_path: None,
        }
    }
}

/// Confirmation returned by a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Full object URI, e.g. `gs://bucket/prefix/file.tif`
    pub uri: String,
    /// Size of the stored object as reported by the backend
    pub size: u64,
}

/// Uploads a local file under an object key.
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn upload(&self, local: &std::path::Path, key: &str) -> StorageResult<UploadReceipt>;
}

/// Object storage client.
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    scheme: &'static str,
}

impl ObjectStorage {
    /// Create a GCS client from config.
    pub fn gcs(config: &ObjectStorageConfig) -> StorageResult<Self> {
        let bucket = config.bucket.trim_start_matches("gs://").trim_end_matches('/');
        if bucket.is_empty() {
            return Err(StorageError::Config("bucket name is empty".to_string()));
        }

        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Some(path) = &config.service_account_path {
            builder = builder.with_service_account_path(path);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(format!("Failed to create GCS client: {}", e)))?;

        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
            scheme: "gs",
        })
    }

    /// In-process store, used for dry runs and tests.
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            bucket: bucket.into(),
            scheme: "memory",
        }
    }

    /// URI of `key` in this bucket.
    pub fn uri(&self, key: &str) -> String {
        format!("{}://{}/{}", self.scheme, self.bucket, key.trim_start_matches('/'))
    }

    /// Write bytes under a key.
    #[instrument(skip(self, data), fields(bucket = %self.bucket, key = %key))]
    pub async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let location = Path::from(key);
        debug!(size = data.len(), "Writing object");

        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| StorageError::backend("put", key, e))?;

        Ok(())
    }

    /// Size of a stored object in bytes.
    pub async fn size(&self, key: &str) -> StorageResult<u64> {
        let location = Path::from(key);

        let meta = self
            .store
            .head(&location)
            .await
            .map_err(|e| StorageError::backend("head", key, e))?;

        Ok(meta.size as u64)
    }
}

#[async_trait]
impl ObjectUploader for ObjectStorage {
    /// Upload a local file, then report the size the backend stored.
    #[instrument(skip(self, local), fields(bucket = %self.bucket, key = %key, local = %local.display()))]
    async fn upload(&self, local: &std::path::Path, key: &str) -> StorageResult<UploadReceipt> {
        let data = tokio::fs::read(local)
            .await
            .map_err(|source| StorageError::LocalRead {
                path: local.display().to_string(),
                source,
            })?;
        let local_size = data.len();

        self.put(key, Bytes::from(data)).await?;
        let size = self.size(key).await?;

        info!(local_size, remote_size = size, "Uploaded object");

        Ok(UploadReceipt {
            uri: self.uri(key),
            size,
        })
    }
}

/// Object key builder for consistent bucket layout.
pub struct StoragePath;

impl StoragePath {
    /// Object key for an exported file.
    /// Format: {prefix}/{filename}, or {filename} with an empty prefix
    pub fn export(prefix: &str, filename: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", prefix, filename)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_keys() {
        assert_eq!(
            StoragePath::export("indices/2023", "ndvi_2023_summer_field_a_epsg3035.tif"),
            "indices/2023/ndvi_2023_summer_field_a_epsg3035.tif"
        );
        assert_eq!(StoragePath::export("/cogs/", "a.tif"), "cogs/a.tif");
        assert_eq!(StoragePath::export("", "a.tif"), "a.tif");
    }

    #[test]
    fn test_uri() {
        let storage = ObjectStorage::in_memory("exports");
        assert_eq!(storage.uri("cogs/a.tif"), "memory://exports/cogs/a.tif");
    }

    #[test]
    fn test_gcs_rejects_empty_bucket() {
        let err = ObjectStorage::gcs(&ObjectStorageConfig::new("gs://")).err();
        assert!(matches!(err, Some(StorageError::Config(_))));
    }

    #[tokio::test]
    async fn test_put_then_size() {
        let storage = ObjectStorage::in_memory("exports");
        storage.put("a/b.bin", Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(storage.size("a/b.bin").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let storage = ObjectStorage::in_memory("exports");
        assert!(matches!(
            storage.size("missing.tif").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
