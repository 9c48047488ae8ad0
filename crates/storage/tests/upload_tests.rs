//! Upload round trips against the in-memory backend.

use storage::{ObjectStorage, ObjectUploader, StorageError, StoragePath};
use test_utils::{scratch_dir, write_fixture};

#[tokio::test]
async fn test_upload_reports_stored_size() {
    let dir = scratch_dir();
    let local = write_fixture(dir.path(), "ndvi.tif", "not really a tiff, but bytes all the same");
    let storage = ObjectStorage::in_memory("exports");

    let key = StoragePath::export("cogs/2023", "ndvi.tif");
    let receipt = storage.upload(&local, &key).await.unwrap();

    assert_eq!(receipt.uri, "memory://exports/cogs/2023/ndvi.tif");
    assert_eq!(receipt.size, std::fs::metadata(&local).unwrap().len());
    assert_eq!(storage.size(&key).await.unwrap(), receipt.size);
}

#[tokio::test]
async fn test_upload_overwrites_existing_object() {
    let dir = scratch_dir();
    let storage = ObjectStorage::in_memory("exports");

    let first = write_fixture(dir.path(), "a.tif", "0123456789");
    storage.upload(&first, "a.tif").await.unwrap();

    let second = write_fixture(dir.path(), "a.tif", "01234");
    let receipt = storage.upload(&second, "a.tif").await.unwrap();

    assert_eq!(receipt.size, 5);
    assert_eq!(storage.size("a.tif").await.unwrap(), 5);
}

#[tokio::test]
async fn test_upload_missing_local_file() {
    let dir = scratch_dir();
    let storage = ObjectStorage::in_memory("exports");

    let err = storage
        .upload(&dir.path().join("missing.tif"), "missing.tif")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::LocalRead { .. }));
}
