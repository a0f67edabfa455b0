//! Locates the stems an engine run produced
//!
//! File names are deterministic:
//! - vocals: `{stem}_{target_instrument}.wav`
//! - accompaniment: `{stem}_instrumental.wav`

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use crate::models::{Artifact, OutputArtifact};

/// Path prefix of artifacts as seen by callers; matches the `/outputs` route
pub const PUBLIC_OUTPUT_ROOT: &str = "outputs";

/// Engine reported success but a stem is unusable
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Expected output file missing: {0}")]
    Missing(PathBuf),

    #[error("Expected output file unreadable: {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn vocals_file_name(stem: &str, target_instrument: &str) -> String {
    format!("{}_{}.wav", stem, target_instrument)
}

pub fn accompaniment_file_name(stem: &str) -> String {
    format!("{}_instrumental.wav", stem)
}

pub struct ArtifactResolver {
    public_root: String,
}

impl ArtifactResolver {
    pub fn new(public_root: impl Into<String>) -> Self {
        Self {
            public_root: public_root.into(),
        }
    }

    /// Verify both stems exist in `output_dir` and build their public paths
    pub async fn resolve(
        &self,
        output_dir: &Path,
        output_key: &str,
        stem: &str,
        target_instrument: &str,
    ) -> Result<OutputArtifact, ResolveError> {
        let vocals = self
            .locate(output_dir, output_key, &vocals_file_name(stem, target_instrument))
            .await?;
        let accompaniment = self
            .locate(output_dir, output_key, &accompaniment_file_name(stem))
            .await?;

        info!("Vocals file size: {} bytes", vocals.size);
        info!("Instrumental file size: {} bytes", accompaniment.size);

        Ok(OutputArtifact {
            vocals,
            accompaniment,
        })
    }

    /// Caller-facing path of a file in an output directory, `/`-separated
    pub fn public_path(&self, output_key: &str, file_name: &str) -> String {
        Path::new(&self.public_root)
            .join(output_key)
            .join(file_name)
            .to_string_lossy()
            .replace('\\', "/")
    }

    async fn locate(
        &self,
        output_dir: &Path,
        output_key: &str,
        file_name: &str,
    ) -> Result<Artifact, ResolveError> {
        let file = output_dir.join(file_name);

        let metadata = match tokio::fs::metadata(&file).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                error!("Expected output is not a regular file: {}", file.display());
                return Err(ResolveError::Missing(file));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!("Expected output file does not exist: {}", file.display());
                return Err(ResolveError::Missing(file));
            }
            Err(source) => return Err(ResolveError::Unreadable { path: file, source }),
        };

        if let Err(source) = tokio::fs::File::open(&file).await {
            return Err(ResolveError::Unreadable { path: file, source });
        }

        Ok(Artifact {
            public_path: self.public_path(output_key, file_name),
            file,
            size: metadata.len(),
        })
    }
}

impl Default for ArtifactResolver {
    fn default() -> Self {
        Self::new(PUBLIC_OUTPUT_ROOT)
    }
}
