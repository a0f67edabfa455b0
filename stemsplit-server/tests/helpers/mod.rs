//! Shared test helpers for stemsplit-server integration tests
//!
//! The separation engine is replaced by a shell script written into a temp
//! directory. It understands the engine's command-line contract and writes
//! stems into `--store_dir` according to the chosen `FakeEngine` behavior.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use stemsplit_common::config::{EngineConfig, OutputLayout, TomlConfig};
use stemsplit_server::config::{CliOverrides, ServiceConfig};
use stemsplit_server::{build_router, AppState};
use tempfile::TempDir;

pub const BOUNDARY: &str = "stemsplit-test-boundary";

/// Sizes written by the fake engine
pub const VOCALS_BYTES: usize = 1_048_576;
pub const INSTRUMENTAL_BYTES: usize = 2_097_152;

/// File the fake engine creates next to its script whenever it is launched
pub const ENGINE_MARKER: &str = "engine_ran";

/// What the fake engine does after parsing its arguments
#[derive(Debug, Clone, Copy)]
pub enum FakeEngine {
    /// Writes both stems and exits 0
    Succeed,
    /// Writes the vocal stem only, then exits 1
    FailAfterPartialOutput,
    /// Writes the vocal stem only and exits 0
    SkipInstrumental,
    /// Never finishes
    Hang,
}

impl FakeEngine {
    fn body(self) -> String {
        let write_vocals = format!(
            "head -c {VOCALS_BYTES} /dev/zero > \"$store/${{stem}}_vocals.wav\""
        );
        let write_instrumental = format!(
            "head -c {INSTRUMENTAL_BYTES} /dev/zero > \"$store/${{stem}}_instrumental.wav\""
        );
        match self {
            FakeEngine::Succeed => format!(
                "for_each_input() {{\n  {write_vocals}\n  {write_instrumental}\n}}\nrun\nexit 0\n"
            ),
            FakeEngine::FailAfterPartialOutput => format!(
                "for_each_input() {{\n  {write_vocals}\n}}\nrun\necho 'CUDA out of memory' >&2\nexit 1\n"
            ),
            FakeEngine::SkipInstrumental => format!(
                "for_each_input() {{\n  {write_vocals}\n}}\nrun\nexit 0\n"
            ),
            FakeEngine::Hang => "echo 'loading model'\nexec sleep 30\n".to_string(),
        }
    }

    fn script(self) -> String {
        format!(
            r#"#!/bin/sh
: > "$(dirname "$0")/{ENGINE_MARKER}"
input=""
store=""
while [ $# -gt 0 ]; do
  case "$1" in
    --input_folder) input="$2"; shift 2 ;;
    --store_dir) store="$2"; shift 2 ;;
    *) shift ;;
  esac
done
run() {{
  for f in "$input"/*; do
    name=$(basename "$f")
    stem="${{name%.*}}"
    for_each_input
  done
}}
{}"#,
            self.body()
        )
    }
}

/// A service instance rooted in a temp directory
pub struct TestService {
    pub temp: TempDir,
    pub state: AppState,
    pub app: Router,
}

impl TestService {
    pub fn uploads_dir(&self) -> PathBuf {
        self.temp.path().join("uploads")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.temp.path().join("outputs")
    }
}

pub struct ServiceOptions {
    pub engine: FakeEngine,
    pub layout: OutputLayout,
    pub timeout_secs: u64,
    pub max_upload_bytes: usize,
    pub target_instrument: &'static str,
    /// Replaces the generated model config YAML
    pub model_config: Option<&'static str>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            engine: FakeEngine::Succeed,
            layout: OutputLayout::Stem,
            timeout_secs: 30,
            max_upload_bytes: 16 * 1024 * 1024,
            target_instrument: "vocals",
            model_config: None,
        }
    }
}

/// Write the fake engine and model config, and return the config pointing at them
pub fn test_config(root: &Path, options: &ServiceOptions) -> ServiceConfig {
    let engine_script = root.join("fake_engine.sh");
    std::fs::write(&engine_script, options.engine.script()).unwrap();

    let model_config = root.join("config_vocals.yaml");
    let yaml = match options.model_config {
        Some(yaml) => yaml.to_string(),
        None => format!(
            "audio:\n  sample_rate: 44100\ntraining:\n  instruments: [vocals, other]\n  target_instrument: {}\n",
            options.target_instrument
        ),
    };
    std::fs::write(&model_config, yaml).unwrap();

    let model = root.join("model.ckpt");
    std::fs::write(&model, b"weights").unwrap();

    let toml = TomlConfig {
        uploads_dir: root.join("uploads"),
        outputs_dir: root.join("outputs"),
        output_layout: options.layout,
        max_upload_bytes: options.max_upload_bytes,
        engine: EngineConfig {
            program: "sh".to_string(),
            args: vec![engine_script.to_string_lossy().into_owned()],
            config_path: model_config,
            model_path: model,
            timeout_secs: options.timeout_secs,
            ..EngineConfig::default()
        },
        ..TomlConfig::default()
    };

    ServiceConfig::from_toml(toml, &CliOverrides::default())
}

pub async fn setup_service(options: ServiceOptions) -> TestService {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path(), &options);
    config.ensure_directories().await.unwrap();

    let state = AppState::new(config);
    let app = build_router(state.clone());
    TestService { temp, state, app }
}

/// Multipart body with one part
///
/// `filename: None` sends a plain form field without a filename parameter.
pub fn multipart_body(field: &str, filename: Option<&str>, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    match filename {
        Some(name) => body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\n")
                .as_bytes(),
        ),
        None => body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field}\"\r\n").as_bytes(),
        ),
    }
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn split_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/split")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// `POST /split` with a `file` part
pub fn upload_request(filename: &str, content: &[u8]) -> Request<Body> {
    split_request(multipart_body("file", Some(filename), content))
}

pub fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("Should read body")
        .to_bytes()
        .to_vec()
}

pub async fn extract_json(response: Response<Body>) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// Whether the fake engine rooted at `root` was ever launched
pub fn engine_ran(root: &Path) -> bool {
    root.join(ENGINE_MARKER).exists()
}

/// Number of entries directly under `dir`
pub fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
