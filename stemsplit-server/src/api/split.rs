//! Split endpoint
//!
//! `POST /split` takes a multipart form with a `file` part, runs the
//! separation engine on it and answers with the public paths of the two
//! stems.
//!
//! The engine runs in its own task. The handler keeps a drop guard on the
//! job's cancellation token, so a caller that disconnects mid-run cancels
//! the job and the engine process is killed.

use axum::{
    extract::{multipart::MultipartError, multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures::TryStreamExt;
use std::io;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::models::{JobOutcome, JobState, SplitResponse, UploadName, ValidationError};
use crate::AppState;

/// Response header carrying the job identifier
pub const JOB_ID_HEADER: &str = "x-job-id";

/// Name of the multipart part holding the upload
const FILE_FIELD: &str = "file";

/// POST /split
pub async fn split(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let mut multipart = multipart.map_err(|rejection| {
        warn!("Rejected split request: {}", rejection.body_text());
        ValidationError::NoFilePart
    })?;

    let field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(FILE_FIELD) && field.file_name().is_some() => {
                break field
            }
            Ok(Some(_)) => continue,
            Ok(None) => return Err(ValidationError::NoFilePart.into()),
            Err(e) => return Err(multipart_error(e)),
        }
    };

    let declared = field.file_name().unwrap_or_default().to_string();
    let upload = UploadName::parse(&declared).inspect_err(|e| {
        info!(filename = %declared, "Rejected upload: {}", e);
    })?;

    let orchestrator = state.orchestrator.clone();
    let mut job = orchestrator.begin(upload).await.inspect_err(|e| {
        error!(error = %e, "Error preparing workspace");
    })?;
    let job_id = job.id();

    let mut reader = StreamReader::new(Box::pin(
        field.map_err(io::Error::other),
    ));
    if let Err(e) = orchestrator.stage(&mut job, &mut reader).await {
        let too_large = is_payload_too_large(&e);
        orchestrator.abandon(job, &e).await;
        return Err(if too_large {
            ApiError::PayloadTooLarge
        } else {
            e.into()
        });
    }

    let cancel = CancellationToken::new();
    state.register_job(job_id, cancel.clone()).await;
    let guard = cancel.clone().drop_guard();

    let task_state = state.clone();
    let task = tokio::spawn(async move {
        let report = task_state.orchestrator.execute(job, cancel).await;
        task_state.unregister_job(job_id).await;
        if !report.outcome.is_success() {
            task_state
                .record_error(format!("job {}: {}", job_id, report.outcome.summary()))
                .await;
        }
        report
    });

    let report = task.await.map_err(|e| {
        error!(job_id = %job_id, error = %e, "Split job task failed");
        ApiError::Processing(e.to_string())
    })?;
    guard.disarm();

    let mut lifecycle = report.lifecycle;
    match report.outcome {
        JobOutcome::Success(artifact) => {
            lifecycle.transition_to(JobState::Responded);
            info!(
                job_id = %job_id,
                output_key = %report.output_key,
                elapsed_seconds = lifecycle.elapsed_seconds(),
                "Split complete"
            );
            Ok((
                [(JOB_ID_HEADER, job_id.to_string())],
                Json(SplitResponse::from(&artifact)),
            )
                .into_response())
        }
        outcome => Err(outcome.into()),
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        warn!("Malformed multipart body: {}", e.body_text());
        ValidationError::NoFilePart.into()
    }
}

/// Whether staging stopped because the body limit was hit
fn is_payload_too_large(e: &ValidationError) -> bool {
    let ValidationError::Workspace(io_err) = e else {
        return false;
    };
    io_err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<MultipartError>())
        .is_some_and(|multipart| multipart.status() == StatusCode::PAYLOAD_TOO_LARGE)
}

/// Build split routes
pub fn split_routes() -> Router<AppState> {
    Router::new().route("/split", post(split))
}
