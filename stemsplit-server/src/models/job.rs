//! Split job state machine and outcome classification
//!
//! A job progresses through:
//! RECEIVED → VALIDATED → STAGED → INVOKED → RESOLVED → RESPONDED
//!
//! FAILED is reachable from VALIDATED, STAGED, INVOKED and RESOLVED.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::{OutputArtifact, ValidationError};

/// Split job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Request accepted by the HTTP layer
    Received,
    /// Filename and extension checked
    Validated,
    /// Upload written to the job workspace
    Staged,
    /// Separation engine exited successfully
    Invoked,
    /// Both stems located on disk
    Resolved,
    /// Success response sent
    Responded,
    /// Job ended with an error
    Failed,
}

impl JobState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Validated, Staged)
                | (Staged, Invoked)
                | (Invoked, Resolved)
                | (Resolved, Responded)
                | (Validated, Failed)
                | (Staged, Failed)
                | (Invoked, Failed)
                | (Resolved, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Responded | JobState::Failed)
    }
}

/// In-memory lifecycle of one job
#[derive(Debug, Clone)]
pub struct JobLifecycle {
    pub job_id: Uuid,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobLifecycle {
    /// Lifecycle for a request that has passed validation
    pub fn validated(job_id: Uuid) -> Self {
        Self {
            job_id,
            state: JobState::Validated,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to `new_state`; illegal transitions are logged and ignored
    pub fn transition_to(&mut self, new_state: JobState) {
        let old_state = self.state;
        if old_state.can_transition_to(new_state) {
            self.state = new_state;
            if new_state.is_terminal() {
                self.ended_at = Some(Utc::now());
            }
            tracing::debug!(job_id = %self.job_id, from = ?old_state, to = ?new_state, "Job state transition");
        } else {
            tracing::warn!(
                job_id = %self.job_id,
                from = ?old_state,
                to = ?new_state,
                "Ignoring illegal job state transition"
            );
        }
    }

    /// Seconds since the job was accepted
    pub fn elapsed_seconds(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        end.signed_duration_since(self.started_at).num_seconds().max(0) as u64
    }
}

/// Why the separation engine did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineFailure {
    /// Engine exited with a nonzero status (`None` when killed by a signal)
    Exited { code: Option<i32> },
    /// Engine could not be started
    Launch(String),
    /// Engine exceeded the wall-clock limit and was killed
    TimedOut(Duration),
    /// Job was cancelled (caller disconnected or service shutting down)
    Cancelled,
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineFailure::Exited { code: Some(code) } => write!(f, "engine exited with status {}", code),
            EngineFailure::Exited { code: None } => write!(f, "engine terminated by signal"),
            EngineFailure::Launch(msg) => write!(f, "engine failed to start: {}", msg),
            EngineFailure::TimedOut(limit) => write!(f, "engine timed out after {:?}", limit),
            EngineFailure::Cancelled => write!(f, "job cancelled"),
        }
    }
}

/// Final classification of one request; exactly one per job
#[derive(Debug)]
pub enum JobOutcome {
    Success(OutputArtifact),
    EngineFailure(EngineFailure),
    /// Config store unusable, or the engine reported success without
    /// producing the expected stems
    ConfigError(String),
    ValidationError(ValidationError),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }

    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            JobOutcome::Success(_) => "success",
            JobOutcome::EngineFailure(_) => "engine_failure",
            JobOutcome::ConfigError(_) => "config_error",
            JobOutcome::ValidationError(_) => "validation_error",
        }
    }

    /// Classification without host details (paths, engine output), safe to
    /// report outside the logs
    pub fn summary(&self) -> String {
        let detail = match self {
            JobOutcome::Success(_) => return self.kind().to_string(),
            JobOutcome::EngineFailure(EngineFailure::Exited { code: Some(code) }) => {
                format!("exit status {}", code)
            }
            JobOutcome::EngineFailure(EngineFailure::Exited { code: None }) => {
                "terminated by signal".to_string()
            }
            JobOutcome::EngineFailure(EngineFailure::Launch(_)) => "launch failed".to_string(),
            JobOutcome::EngineFailure(EngineFailure::TimedOut(limit)) => {
                format!("timed out after {}s", limit.as_secs())
            }
            JobOutcome::EngineFailure(EngineFailure::Cancelled) => "cancelled".to_string(),
            JobOutcome::ConfigError(_) => return self.kind().to_string(),
            JobOutcome::ValidationError(e) if e.is_client_error() => e.to_string(),
            JobOutcome::ValidationError(_) => "workspace error".to_string(),
        };
        format!("{}: {}", self.kind(), detail)
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Success(artifact) => write!(
                f,
                "stems ready: {} ({} bytes), {} ({} bytes)",
                artifact.vocals.public_path,
                artifact.vocals.size,
                artifact.accompaniment.public_path,
                artifact.accompaniment.size
            ),
            JobOutcome::EngineFailure(failure) => write!(f, "{}", failure),
            JobOutcome::ConfigError(cause) => write!(f, "configuration error: {}", cause),
            JobOutcome::ValidationError(err) => write!(f, "{}", err),
        }
    }
}
