//! Storage abstractions for exported rasters.
//!
//! Provides:
//! - An `object_store` backed client (GCS or in-memory)
//! - The `ObjectUploader` seam used by the export stage
//! - Object key layout for uploaded COGs

pub mod error;
pub mod object_store;

pub use self::error::{StorageError, StorageResult};
pub use self::object_store::{
    ObjectStorage, ObjectStorageConfig, ObjectUploader, StoragePath, UploadReceipt,
};
