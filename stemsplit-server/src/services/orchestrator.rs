//! Split job orchestration
//!
//! Sequences one job through the workspace manager, the job runner and the
//! artifact resolver:
//!
//! 1. `begin` - wait for a job slot, create the job workspace
//! 2. `stage` - write the upload into the workspace
//! 3. `execute` - run the engine, resolve the stems, remove the workspace
//!
//! Staging reads straight from the request body, so the HTTP handler drives
//! steps 1-2 itself and hands step 3 to a separate task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use stemsplit_common::config::OutputLayout;
use tokio::io::AsyncRead;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::models::{
    EngineFailure, JobLifecycle, JobOutcome, JobState, UploadName, ValidationError,
};

use super::artifact_resolver::ArtifactResolver;
use super::job_runner::{EngineSettings, JobRunner, RunError};
use super::workspace_manager::{clear_files, WorkspaceManager};

/// A job holding a slot and a workspace
pub struct SplitJob {
    lifecycle: JobLifecycle,
    upload: UploadName,
    workspace: PathBuf,
    _slot: OwnedSemaphorePermit,
}

impl SplitJob {
    pub fn id(&self) -> Uuid {
        self.lifecycle.job_id
    }
}

/// Result of `execute`
#[derive(Debug)]
pub struct JobReport {
    pub lifecycle: JobLifecycle,
    /// Directory name under the output root
    pub output_key: String,
    pub outcome: JobOutcome,
}

pub struct SplitOrchestrator {
    workspaces: WorkspaceManager,
    runner: JobRunner,
    resolver: ArtifactResolver,
    outputs_root: PathBuf,
    layout: OutputLayout,
    slots: Arc<Semaphore>,
}

impl SplitOrchestrator {
    pub fn new(
        workspaces: WorkspaceManager,
        runner: JobRunner,
        resolver: ArtifactResolver,
        outputs_root: PathBuf,
        layout: OutputLayout,
        max_concurrent_jobs: usize,
    ) -> Self {
        let permits = match layout {
            OutputLayout::JobId => max_concurrent_jobs.max(1),
            OutputLayout::Stem => {
                if max_concurrent_jobs > 1 {
                    warn!(
                        "output_layout = \"stem\" shares output directories between jobs; \
                         limiting to one job at a time (max_concurrent_jobs = {} ignored)",
                        max_concurrent_jobs
                    );
                }
                1
            }
        };

        Self {
            workspaces,
            runner,
            resolver,
            outputs_root,
            layout,
            slots: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            WorkspaceManager::new(config.uploads_dir.clone()),
            JobRunner::new(EngineSettings::from(&config.engine)),
            ArtifactResolver::default(),
            config.outputs_dir.clone(),
            config.output_layout,
            config.max_concurrent_jobs,
        )
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn outputs_root(&self) -> &Path {
        &self.outputs_root
    }

    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    /// Job slots currently free
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Output directory name for a job
    pub fn output_key(&self, job: &SplitJob) -> String {
        match self.layout {
            OutputLayout::JobId => job.id().to_string(),
            OutputLayout::Stem => job.upload.stem().to_string(),
        }
    }

    /// Wait for a free job slot and create the job's workspace
    pub async fn begin(&self, upload: UploadName) -> Result<SplitJob, ValidationError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ValidationError::Workspace(std::io::Error::other("job slots closed")))?;

        let job_id = Uuid::new_v4();
        let workspace = self.workspaces.create_workspace(job_id).await?;

        info!(
            job_id = %job_id,
            filename = %upload.sanitized(),
            "Accepted split job"
        );

        Ok(SplitJob {
            lifecycle: JobLifecycle::validated(job_id),
            upload,
            workspace,
            _slot: slot,
        })
    }

    /// Write the upload into the job workspace
    pub async fn stage<R>(&self, job: &mut SplitJob, reader: &mut R) -> Result<(), ValidationError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let staged = self
            .workspaces
            .stage(&job.workspace, &job.upload, reader)
            .await?;
        debug!(job_id = %job.id(), "Staged upload at {}", staged.display());
        job.lifecycle.transition_to(JobState::Staged);
        Ok(())
    }

    /// Give up on a job that failed before `execute`
    pub async fn abandon(&self, mut job: SplitJob, cause: &ValidationError) -> JobLifecycle {
        error!(job_id = %job.id(), error = %cause, "Error staging upload");
        job.lifecycle.transition_to(JobState::Failed);
        self.remove_workspace(job.id()).await;
        job.lifecycle
    }

    /// Run the engine on a staged job and resolve its stems
    ///
    /// The workspace is removed afterwards whatever the outcome.
    pub async fn execute(&self, mut job: SplitJob, cancel: CancellationToken) -> JobReport {
        let output_key = self.output_key(&job);
        let output_dir = self.outputs_root.join(&output_key);

        let outcome = self.run_and_resolve(&mut job, &output_key, &output_dir, &cancel).await;

        if outcome.is_success() {
            info!(
                job_id = %job.id(),
                elapsed_seconds = job.lifecycle.elapsed_seconds(),
                "{}",
                outcome
            );
        } else {
            job.lifecycle.transition_to(JobState::Failed);
            error!(
                job_id = %job.id(),
                outcome = outcome.kind(),
                "Error processing file: {}",
                outcome
            );
        }

        self.remove_workspace(job.id()).await;

        JobReport {
            lifecycle: job.lifecycle.clone(),
            output_key,
            outcome,
        }
    }

    /// `begin`, `stage` and `execute` in one call
    pub async fn process<R>(
        &self,
        upload: UploadName,
        reader: &mut R,
        cancel: CancellationToken,
    ) -> JobReport
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut job = match self.begin(upload).await {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Error preparing workspace");
                return JobReport {
                    lifecycle: {
                        let mut lifecycle = JobLifecycle::validated(Uuid::new_v4());
                        lifecycle.transition_to(JobState::Failed);
                        lifecycle
                    },
                    output_key: String::new(),
                    outcome: JobOutcome::ValidationError(e),
                };
            }
        };

        if let Err(e) = self.stage(&mut job, reader).await {
            let output_key = self.output_key(&job);
            let lifecycle = self.abandon(job, &e).await;
            return JobReport {
                lifecycle,
                output_key,
                outcome: JobOutcome::ValidationError(e),
            };
        }

        self.execute(job, cancel).await
    }

    async fn run_and_resolve(
        &self,
        job: &mut SplitJob,
        output_key: &str,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let job_id = job.id();

        if let Err(e) = self.prepare_output_dir(output_dir).await {
            error!(job_id = %job_id, error = %e, "Failed to prepare output directory {}", output_dir.display());
            return JobOutcome::ValidationError(ValidationError::Workspace(e));
        }

        let run = match self.runner.run(job_id, &job.workspace, output_dir, cancel).await {
            Ok(run) => run,
            Err(RunError::Config(e)) => return JobOutcome::ConfigError(e.to_string()),
            Err(RunError::Launch(e)) => {
                return JobOutcome::EngineFailure(EngineFailure::Launch(e.to_string()))
            }
            Err(RunError::Wait(e)) => {
                error!(job_id = %job_id, error = %e, "Lost track of engine process");
                return JobOutcome::EngineFailure(EngineFailure::Exited { code: None });
            }
            Err(RunError::TimedOut(limit)) => {
                return JobOutcome::EngineFailure(EngineFailure::TimedOut(limit))
            }
            Err(RunError::Cancelled) => return JobOutcome::EngineFailure(EngineFailure::Cancelled),
        };

        if !run.result.success() {
            error!(
                job_id = %job_id,
                exit_code = ?run.result.exit_code,
                stderr = %run.result.stderr,
                "Error processing file. Exit code: {:?}",
                run.result.exit_code
            );
            return JobOutcome::EngineFailure(EngineFailure::Exited {
                code: run.result.exit_code,
            });
        }
        job.lifecycle.transition_to(JobState::Invoked);

        match self
            .resolver
            .resolve(output_dir, output_key, job.upload.stem(), &run.target_instrument)
            .await
        {
            Ok(artifact) => {
                job.lifecycle.transition_to(JobState::Resolved);
                JobOutcome::Success(artifact)
            }
            Err(e) => {
                error!(
                    job_id = %job_id,
                    error = %e,
                    stdout = %run.result.stdout,
                    "Engine exited successfully but outputs are missing"
                );
                JobOutcome::ConfigError(e.to_string())
            }
        }
    }

    /// Create the job's output directory, clearing stale stems left by an
    /// earlier job with the same key
    async fn prepare_output_dir(&self, output_dir: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(output_dir).await?;
        let removed = clear_files(output_dir).await?;
        if removed > 0 {
            info!(removed, "Replacing previous outputs in {}", output_dir.display());
        }
        Ok(())
    }

    async fn remove_workspace(&self, job_id: Uuid) {
        if let Err(e) = self.workspaces.cleanup_workspace(job_id).await {
            warn!(job_id = %job_id, error = %e, "Failed to cleanup workspace");
        }
    }
}
