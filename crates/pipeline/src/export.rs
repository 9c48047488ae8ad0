//! Export stage: COG encoding, atomic placement and optional upload.

use cog::CogOptions;
use metrics::counter;
use raster::{DownsampleMethod, RasterArtifact};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{ObjectUploader, StoragePath};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::aoi::AoiGeometry;
use crate::config::{CogSettings, JobSpec, StorageTarget};
use crate::error::ExportError;
use crate::naming::output_filename;
use crate::registry::{VariableDescriptor, VariableKind};

pub type Result<T> = std::result::Result<T, ExportError>;

/// Where an exported COG ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReceipt {
    pub local_path: PathBuf,
    pub remote_uri: Option<String>,
    pub bytes: u64,
}

/// Writes COGs and publishes them to the job's storage target.
#[derive(Clone, Default)]
pub struct ExportStage {
    uploader: Option<Arc<dyn ObjectUploader>>,
}

impl ExportStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object storage client used for `gcs_cog` targets.
    pub fn with_uploader(mut self, uploader: Arc<dyn ObjectUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Write `raster` under its deterministic name, replacing any previous
    /// output, then upload it when the target is remote.
    ///
    /// The local file is kept when the upload fails or the sizes disagree.
    #[instrument(skip_all, fields(variable = %variable.name, aoi = %aoi.slug, year = job.year, season = %job.season))]
    pub async fn export(
        &self,
        variable: &VariableDescriptor,
        raster: RasterArtifact,
        aoi: &AoiGeometry,
        job: &JobSpec,
    ) -> Result<ExportReceipt> {
        let filename = output_filename(&variable.name, job.year, job.season, &aoi.slug, job.crs);
        let dir = job.storage.local_dir();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ExportError::io(dir, e))?;

        let final_path = dir.join(&filename);
        let options = cog_options(variable, &job.cog);
        let bytes = write_atomic(raster, &final_path, options).await?;

        let remote_uri = match &job.storage {
            StorageTarget::LocalCog { .. } => None,
            StorageTarget::GcsCog { prefix, .. } => {
                let key = StoragePath::export(prefix, &filename);
                Some(self.upload(&final_path, &key, bytes).await?)
            }
        };

        counter!("etl_export_bytes_total").increment(bytes);
        info!(
            path = %final_path.display(),
            remote = remote_uri.as_deref().unwrap_or("-"),
            bytes,
            "Export complete"
        );

        Ok(ExportReceipt {
            local_path: final_path,
            remote_uri,
            bytes,
        })
    }

    async fn upload(&self, local: &Path, key: &str, local_size: u64) -> Result<String> {
        let uploader = self
            .uploader
            .as_ref()
            .ok_or_else(|| ExportError::Upload {
                local_path: local.to_path_buf(),
                reason: "no object storage client configured".to_string(),
            })?;

        let receipt = uploader
            .upload(local, key)
            .await
            .map_err(|e| ExportError::Upload {
                local_path: local.to_path_buf(),
                reason: e.to_string(),
            })?;

        if receipt.size != local_size {
            warn!(
                uri = %receipt.uri,
                local = local_size,
                remote = receipt.size,
                path = %local.display(),
                "Uploaded size differs from local file; keeping local copy"
            );
            return Err(ExportError::SizeMismatch {
                uri: receipt.uri,
                local: local_size,
                remote: receipt.size,
                local_path: local.to_path_buf(),
            });
        }

        Ok(receipt.uri)
    }
}

/// Encoder options for a variable: categorical overviews use nearest.
pub fn cog_options(variable: &VariableDescriptor, settings: &CogSettings) -> CogOptions {
    CogOptions {
        tile_size: settings.tile_size,
        compression_level: settings.compression_level,
        overview_method: match variable.kind {
            VariableKind::Continuous => DownsampleMethod::Mean,
            VariableKind::Categorical => DownsampleMethod::Nearest,
        },
    }
}

/// Hidden temporary name in the same directory as `final_path`.
fn temp_path(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    final_path.with_file_name(format!(".{}.{}.tmp.tif", name, Uuid::new_v4().simple()))
}

/// Encode to a temporary file and rename it over `final_path`.
async fn write_atomic(raster: RasterArtifact, final_path: &Path, options: CogOptions) -> Result<u64> {
    let tmp = temp_path(final_path);
    let tmp_for_task = tmp.clone();

    let written = tokio::task::spawn_blocking(move || cog::write_cog(&raster, &tmp_for_task, &options))
        .await
        .map_err(|e| ExportError::Encode(format!("encoder task failed: {}", e)))
        .and_then(|r| r.map_err(|e| ExportError::Encode(e.to_string())));

    let bytes = match written {
        Ok(bytes) => bytes,
        Err(e) => {
            remove_quietly(&tmp).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&tmp, final_path).await {
        remove_quietly(&tmp).await;
        return Err(ExportError::io(final_path, e));
    }

    Ok(bytes)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
        }
    }
}
