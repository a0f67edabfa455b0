//! Data models for the split service
//!
//! - Upload validation and filename sanitization
//! - Job state machine and outcome classification
//! - Produced stems

pub mod artifact;
pub mod job;
pub mod upload;

pub use artifact::{Artifact, OutputArtifact, SplitResponse};
pub use job::{EngineFailure, JobLifecycle, JobOutcome, JobState};
pub use upload::{UploadName, ValidationError, ALLOWED_EXTENSIONS};
