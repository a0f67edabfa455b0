//! Per-job upload staging
//!
//! Every job gets its own directory `<uploads>/<job-id>/`, which is the
//! engine's input folder. Staging clears any loose files in that directory
//! before writing, so the engine only ever sees the current upload.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{UploadName, ValidationError};

pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Staging directory of a job (not necessarily existing)
    pub fn workspace_path(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    pub async fn create_workspace(&self, job_id: Uuid) -> std::io::Result<PathBuf> {
        let path = self.workspace_path(job_id);
        fs::create_dir_all(&path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            fs::set_permissions(&path, perms).await?;
        }

        debug!(job_id = %job_id, "Created workspace at {}", path.display());
        Ok(path)
    }

    /// Write an upload into `workspace` under its sanitized name
    ///
    /// Removes every file (not subdirectory) already present first. On
    /// success the directory holds exactly the staged file among its files.
    pub async fn stage<R>(
        &self,
        workspace: &Path,
        upload: &UploadName,
        reader: &mut R,
    ) -> Result<PathBuf, ValidationError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let removed = clear_files(workspace).await?;
        if removed > 0 {
            info!(
                removed,
                "Cleared leftover files from workspace {}",
                workspace.display()
            );
        }

        let staged = workspace.join(upload.sanitized());
        let written = match write_upload(&staged, reader).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&staged).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(error = %cleanup, "Failed to remove partial upload {}", staged.display());
                    }
                }
                return Err(ValidationError::Workspace(e));
            }
        };

        info!(
            original = %upload.original(),
            bytes = written,
            "Staged upload at {}",
            staged.display()
        );
        Ok(staged)
    }

    pub async fn cleanup_workspace(&self, job_id: Uuid) -> std::io::Result<()> {
        let path = self.workspace_path(job_id);

        if fs::try_exists(&path).await? {
            debug!(job_id = %job_id, "Cleaning up workspace: {}", path.display());
            fs::remove_dir_all(&path).await?;
        }

        Ok(())
    }

    /// Remove staging directories not modified within `max_age`
    ///
    /// Returns the number of directories removed.
    pub async fn cleanup_old_workspaces(&self, max_age: Duration) -> std::io::Result<usize> {
        if !fs::try_exists(&self.root).await? {
            return Ok(0);
        }

        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut entries = fs::read_dir(&self.root).await?;
        let mut cleaned = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }

            if let Ok(modified) = metadata.modified() {
                if modified < cutoff {
                    if let Err(e) = fs::remove_dir_all(entry.path()).await {
                        error!("Failed to remove old workspace {:?}: {}", entry.path(), e);
                    } else {
                        cleaned += 1;
                    }
                }
            }
        }

        if cleaned > 0 {
            info!("Cleaned up {} old workspaces", cleaned);
        }

        Ok(cleaned)
    }
}

/// Delete every non-directory entry of `dir`, returning how many were removed
pub async fn clear_files(dir: &Path) -> std::io::Result<usize> {
    let mut entries = fs::read_dir(dir).await?;
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        if file_type.is_file() || file_type.is_symlink() {
            fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

async fn write_upload<R>(path: &Path, reader: &mut R) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = fs::File::create(path).await?;
    let written = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
