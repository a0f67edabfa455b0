//! Integration tests for job orchestration
//!
//! Tests cover:
//! - Orchestrator end-to-end without HTTP
//! - Model config problems stopping a job before the engine starts
//! - Cancellation by token and by caller disconnect
//! - Job slot limits per output layout
//! - Sweeping of abandoned workspaces

#![cfg(unix)]

mod helpers;

use helpers::*;
use std::time::Duration;
use stemsplit_common::config::OutputLayout;
use stemsplit_server::models::{EngineFailure, JobOutcome, JobState, UploadName};
use stemsplit_server::services::SplitOrchestrator;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;
use uuid::Uuid;

async fn orchestrator(options: ServiceOptions) -> (TempDir, SplitOrchestrator) {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path(), &options);
    config.ensure_directories().await.unwrap();
    let orchestrator = SplitOrchestrator::from_config(&config);
    (temp, orchestrator)
}

/// Poll until `check` holds or the deadline passes
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_process_success() {
    let (temp, orchestrator) = orchestrator(ServiceOptions::default()).await;

    let upload = UploadName::parse("track.ogg").unwrap();
    let report = orchestrator
        .process(upload, &mut &b"OggS"[..], CancellationToken::new())
        .await;

    assert_eq!(report.output_key, "track");
    assert_eq!(report.lifecycle.state, JobState::Resolved);
    match report.outcome {
        JobOutcome::Success(artifact) => {
            assert_eq!(artifact.vocals.public_path, "outputs/track/track_vocals.wav");
            assert_eq!(artifact.vocals.size, VOCALS_BYTES as u64);
            assert_eq!(artifact.accompaniment.size, INSTRUMENTAL_BYTES as u64);
            assert_eq!(artifact.vocals.file, temp.path().join("outputs/track/track_vocals.wav"));
        }
        other => panic!("expected success, got {}", other),
    }
    assert_eq!(entry_count(&temp.path().join("uploads")), 0);
    assert!(engine_ran(temp.path()));
}

#[tokio::test]
async fn test_broken_model_config_stops_before_launch() {
    for yaml in [
        "training: [unclosed\n",
        "audio:\n  sample_rate: 44100\ntraining:\n  batch_size: 4\n",
    ] {
        let (temp, orchestrator) = orchestrator(ServiceOptions {
            model_config: Some(yaml),
            ..ServiceOptions::default()
        })
        .await;

        let upload = UploadName::parse("song.mp3").unwrap();
        let report = orchestrator
            .process(upload, &mut &b"ID3"[..], CancellationToken::new())
            .await;

        assert!(
            matches!(report.outcome, JobOutcome::ConfigError(_)),
            "{yaml}: {}",
            report.outcome
        );
        assert_eq!(report.lifecycle.state, JobState::Failed);
        assert!(!engine_ran(temp.path()), "{yaml}");
        assert_eq!(entry_count(&temp.path().join("uploads")), 0);
    }
}

#[tokio::test]
async fn test_engine_failure_is_classified() {
    let (_temp, orchestrator) = orchestrator(ServiceOptions {
        engine: FakeEngine::FailAfterPartialOutput,
        ..ServiceOptions::default()
    })
    .await;

    let upload = UploadName::parse("song.mp3").unwrap();
    let report = orchestrator
        .process(upload, &mut &b"ID3"[..], CancellationToken::new())
        .await;

    assert_eq!(report.lifecycle.state, JobState::Failed);
    assert!(matches!(
        report.outcome,
        JobOutcome::EngineFailure(EngineFailure::Exited { code: Some(1) })
    ));
}

#[tokio::test]
async fn test_missing_output_is_config_error() {
    let (_temp, orchestrator) = orchestrator(ServiceOptions {
        engine: FakeEngine::SkipInstrumental,
        ..ServiceOptions::default()
    })
    .await;

    let upload = UploadName::parse("song.mp3").unwrap();
    let report = orchestrator
        .process(upload, &mut &b"ID3"[..], CancellationToken::new())
        .await;

    assert!(matches!(report.outcome, JobOutcome::ConfigError(_)));
}

#[tokio::test]
async fn test_cancel_token_kills_engine() {
    let (temp, orchestrator) = orchestrator(ServiceOptions {
        engine: FakeEngine::Hang,
        ..ServiceOptions::default()
    })
    .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let upload = UploadName::parse("song.mp3").unwrap();
    let report = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator.process(upload, &mut &b"ID3"[..], cancel),
    )
    .await
    .expect("cancelled job should finish promptly");

    assert!(matches!(
        report.outcome,
        JobOutcome::EngineFailure(EngineFailure::Cancelled)
    ));
    assert!(!temp.path().join("outputs/song").exists());
    assert_eq!(entry_count(&temp.path().join("uploads")), 0);
}

#[tokio::test]
async fn test_caller_disconnect_cancels_job() {
    let service = setup_service(ServiceOptions {
        engine: FakeEngine::Hang,
        ..ServiceOptions::default()
    })
    .await;

    // Dropping the request future stands in for the caller going away
    let pending = service
        .app
        .clone()
        .oneshot(upload_request("song.mp3", b"ID3"));
    let result = tokio::time::timeout(Duration::from_millis(500), pending).await;
    assert!(result.is_err());

    let state = service.state.clone();
    assert!(eventually(|| {
        let state = state.clone();
        async move { state.active_jobs().await == 0 }
    })
    .await);

    let uploads = service.uploads_dir();
    assert!(eventually(|| {
        let uploads = uploads.clone();
        async move { entry_count(&uploads) == 0 }
    })
    .await);
    assert!(!service.outputs_dir().join("song").exists());
}

#[tokio::test]
async fn test_cancel_all_jobs() {
    let service = setup_service(ServiceOptions {
        engine: FakeEngine::Hang,
        ..ServiceOptions::default()
    })
    .await;

    let app = service.app.clone();
    let request = tokio::spawn(async move { app.oneshot(upload_request("song.mp3", b"ID3")).await });

    let state = service.state.clone();
    assert!(eventually(|| {
        let state = state.clone();
        async move { state.active_jobs().await == 1 }
    })
    .await);

    assert_eq!(service.state.cancel_all_jobs().await, 1);

    let response = tokio::time::timeout(Duration::from_secs(10), request)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        response.status(),
        axum::http::StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn test_stem_layout_forces_single_slot() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(temp.path(), &ServiceOptions::default());
    config.max_concurrent_jobs = 4;

    let stem = SplitOrchestrator::from_config(&config);
    assert_eq!(stem.available_slots(), 1);

    config.output_layout = OutputLayout::JobId;
    let by_job = SplitOrchestrator::from_config(&config);
    assert_eq!(by_job.available_slots(), 4);
}

#[tokio::test]
async fn test_slot_held_until_job_ends() {
    let (_temp, orchestrator) = orchestrator(ServiceOptions::default()).await;

    let job = orchestrator
        .begin(UploadName::parse("song.mp3").unwrap())
        .await
        .unwrap();
    assert_eq!(orchestrator.available_slots(), 0);

    let second = tokio::time::timeout(
        Duration::from_millis(200),
        orchestrator.begin(UploadName::parse("other.mp3").unwrap()),
    )
    .await;
    assert!(second.is_err(), "second job should wait for a slot");

    orchestrator
        .abandon(job, &std::io::Error::other("test").into())
        .await;
    assert_eq!(orchestrator.available_slots(), 1);
}

#[tokio::test]
async fn test_sweep_removes_old_workspaces() {
    let (_temp, orchestrator) = orchestrator(ServiceOptions::default()).await;
    let workspaces = orchestrator.workspaces();

    let job_id = Uuid::new_v4();
    let workspace = workspaces.create_workspace(job_id).await.unwrap();
    tokio::fs::write(workspace.join("song.mp3"), b"ID3").await.unwrap();

    assert_eq!(
        workspaces
            .cleanup_old_workspaces(Duration::from_secs(3600))
            .await
            .unwrap(),
        0
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        workspaces
            .cleanup_old_workspaces(Duration::from_millis(1))
            .await
            .unwrap(),
        1
    );
    assert!(!workspace.exists());
}
