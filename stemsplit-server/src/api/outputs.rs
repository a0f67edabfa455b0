//! Artifact download endpoint
//!
//! `GET /outputs/<key>/<file>` serves produced stems from the output root.
//! Range requests and content types are handled by `tower_http::services::ServeFile`.

use axum::{
    extract::{Path, Request, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::path::{Component, Path as FsPath, PathBuf};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /outputs/*path
pub async fn serve_output(
    State(state): State<AppState>,
    Path(requested): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let file = resolve_output_path(state.orchestrator.outputs_root(), &requested)
        .await
        .ok_or(ApiError::NotFound)?;

    debug!("Serving artifact {}", file.display());

    let response = match ServeFile::new(&file).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    Ok(response.into_response())
}

/// Map a requested path onto a regular file inside `root`
///
/// Returns `None` for anything other than plain relative components, for
/// paths whose symlink-resolved target leaves the root, and for
/// non-files.
pub async fn resolve_output_path(root: &FsPath, requested: &str) -> Option<PathBuf> {
    let relative = FsPath::new(requested);
    if requested.is_empty()
        || !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
    {
        warn!("Rejected output path {:?}", requested);
        return None;
    }

    let root = tokio::fs::canonicalize(root).await.ok()?;
    let candidate = tokio::fs::canonicalize(root.join(relative)).await.ok()?;
    if !candidate.starts_with(&root) {
        warn!(
            "Rejected output path {:?}: resolves outside {}",
            requested,
            root.display()
        );
        return None;
    }

    let metadata = tokio::fs::metadata(&candidate).await.ok()?;
    metadata.is_file().then_some(candidate)
}

/// Build artifact download routes
pub fn output_routes() -> Router<AppState> {
    Router::new().route("/outputs/*path", get(serve_output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn output_root() -> TempDir {
        let temp = TempDir::new().unwrap();
        tokio::fs::create_dir_all(temp.path().join("song")).await.unwrap();
        tokio::fs::write(temp.path().join("song/song_vocals.wav"), b"RIFF")
            .await
            .unwrap();
        temp
    }

    #[tokio::test]
    async fn test_resolves_file_inside_root() {
        let temp = output_root().await;
        let resolved = resolve_output_path(temp.path(), "song/song_vocals.wav")
            .await
            .unwrap();
        assert!(resolved.ends_with("song/song_vocals.wav"));
    }

    #[tokio::test]
    async fn test_rejects_non_normal_components() {
        let temp = output_root().await;
        for requested in ["", "../secret", "song/../song/song_vocals.wav", "/etc/passwd"] {
            assert!(
                resolve_output_path(temp.path(), requested).await.is_none(),
                "{requested}"
            );
        }
    }

    #[tokio::test]
    async fn test_rejects_directories_and_missing_files() {
        let temp = output_root().await;
        assert!(resolve_output_path(temp.path(), "song").await.is_none());
        assert!(resolve_output_path(temp.path(), "song/nope.wav").await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rejects_symlink_escaping_root() {
        let temp = output_root().await;
        let outside = TempDir::new().unwrap();
        tokio::fs::write(outside.path().join("secret.txt"), b"secret")
            .await
            .unwrap();
        tokio::fs::symlink(outside.path().join("secret.txt"), temp.path().join("song/link.wav"))
            .await
            .unwrap();

        assert!(resolve_output_path(temp.path(), "song/link.wav").await.is_none());
    }
}
