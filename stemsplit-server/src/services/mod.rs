//! Service components of the split pipeline
//!
//! Workspace manager → job runner → artifact resolver, sequenced by the
//! split orchestrator.

pub mod artifact_resolver;
pub mod config_store;
pub mod job_runner;
pub mod orchestrator;
pub mod workspace_manager;

pub use artifact_resolver::{ArtifactResolver, ResolveError, PUBLIC_OUTPUT_ROOT};
pub use config_store::{load_target_instrument, ConfigStoreError};
pub use job_runner::{EngineInvocation, EngineResult, EngineRun, EngineSettings, JobRunner, RunError};
pub use orchestrator::{JobReport, SplitJob, SplitOrchestrator};
pub use workspace_manager::WorkspaceManager;
