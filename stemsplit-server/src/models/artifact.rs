//! Produced stems and their public paths

use serde::Serialize;
use std::path::PathBuf;

/// One produced stem file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Caller-facing path, always `/`-separated (e.g. `outputs/song/song_vocals.wav`)
    pub public_path: String,
    /// Location on disk
    pub file: PathBuf,
    /// Size in bytes at resolution time
    pub size: u64,
}

/// The vocal and accompaniment stems of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub vocals: Artifact,
    pub accompaniment: Artifact,
}

/// Body of a successful `POST /split`
#[derive(Debug, Clone, Serialize)]
pub struct SplitResponse {
    pub vocals: String,
    pub accompaniment: String,
}

impl From<&OutputArtifact> for SplitResponse {
    fn from(artifact: &OutputArtifact) -> Self {
        Self {
            vocals: artifact.vocals.public_path.clone(),
            accompaniment: artifact.accompaniment.public_path.clone(),
        }
    }
}
