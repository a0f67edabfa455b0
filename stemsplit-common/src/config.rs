//! Bootstrap configuration loading and config file resolution
//!
//! Configuration file priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`STEMSPLIT_CONFIG`)
//! 3. User config file (`~/.config/stemsplit/stemsplit.toml` on Linux)
//! 4. System config file (`/etc/stemsplit/stemsplit.toml`, Linux only)
//! 5. Built-in defaults (code constants)
//!
//! A missing config file is not fatal: a warning is logged and the built-in
//! defaults are used. A config file that exists but cannot be parsed is an
//! error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "STEMSPLIT_CONFIG";

/// Config file name looked up in the platform config directories
pub const CONFIG_FILE_NAME: &str = "stemsplit.toml";

/// How output directories under the output root are keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// One directory per job, named by the generated job id
    #[default]
    JobId,
    /// One directory per uploaded filename stem (legacy layout)
    ///
    /// Jobs with the same filename share a directory, so the service runs
    /// at most one job at a time in this layout.
    Stem,
}

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change while the service is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Address to bind the HTTP server to
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root of the per-job upload staging directories
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    /// Root of the produced stems, served under `/outputs`
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: PathBuf,

    #[serde(default)]
    pub output_layout: OutputLayout,

    /// Upper bound on engine runs in flight
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Request body limit for `POST /split`
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Staging directories older than this are swept
    #[serde(default = "default_workspace_max_age_secs")]
    pub workspace_max_age_secs: u64,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Separation engine invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Executable to launch
    #[serde(default = "default_engine_program")]
    pub program: String,

    /// Leading arguments placed before the engine flags (e.g. the script path)
    #[serde(default = "default_engine_args")]
    pub args: Vec<String>,

    /// Model configuration file (YAML) passed as `--config_path`
    #[serde(default = "default_engine_config_path")]
    pub config_path: PathBuf,

    /// Model checkpoint passed as `--model_path`
    #[serde(default = "default_engine_model_path")]
    pub model_path: PathBuf,

    /// Wall-clock limit for one engine run
    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,

    /// Bytes of stdout/stderr retained per stream
    #[serde(default = "default_capture_limit_bytes")]
    pub capture_limit_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_outputs_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_workspace_max_age_secs() -> u64 {
    24 * 3600
}

fn default_engine_program() -> String {
    "python3".to_string()
}

fn default_engine_args() -> Vec<String> {
    vec!["inference.py".to_string()]
}

fn default_engine_config_path() -> PathBuf {
    PathBuf::from("configs/config_vocals_mel_band_roformer.yaml")
}

fn default_engine_model_path() -> PathBuf {
    PathBuf::from("MelBandRoformer.ckpt")
}

fn default_engine_timeout_secs() -> u64 {
    3600
}

fn default_capture_limit_bytes() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            uploads_dir: default_uploads_dir(),
            outputs_dir: default_outputs_dir(),
            output_layout: OutputLayout::default(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_upload_bytes: default_max_upload_bytes(),
            cors_origins: default_cors_origins(),
            workspace_max_age_secs: default_workspace_max_age_secs(),
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_engine_program(),
            args: default_engine_args(),
            config_path: default_engine_config_path(),
            model_path: default_engine_model_path(),
            timeout_secs: default_engine_timeout_secs(),
            capture_limit_bytes: default_capture_limit_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Locates the config file following the priority order in the module docs
pub struct ConfigFileResolver {
    cli_arg: Option<PathBuf>,
}

impl ConfigFileResolver {
    pub fn new(cli_arg: Option<PathBuf>) -> Self {
        Self { cli_arg }
    }

    /// Return the first candidate config file, or `None` to use defaults
    ///
    /// Explicit paths (CLI, ENV) are returned even when they do not exist so
    /// the loader can warn about them; platform locations are only returned
    /// when present.
    pub fn resolve(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_arg {
            return Some(path.clone());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        if let Some(user_config) = dirs::config_dir().map(|d| d.join("stemsplit").join(CONFIG_FILE_NAME)) {
            if user_config.exists() {
                return Some(user_config);
            }
        }

        if cfg!(target_os = "linux") {
            let system_config = PathBuf::from("/etc/stemsplit").join(CONFIG_FILE_NAME);
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }
}

/// Load bootstrap configuration, degrading to defaults when no file exists
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        warn!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(
            "Config file not found: {} (using built-in defaults)",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = parse_toml_config(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded config file: {}", path.display());
    Ok(config)
}

/// Parse and validate bootstrap configuration text
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    let config: TomlConfig =
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

impl TomlConfig {
    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(Error::Config(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.engine.program.trim().is_empty() {
            return Err(Error::Config("engine.program must not be empty".to_string()));
        }
        if self.engine.timeout_secs == 0 {
            return Err(Error::Config("engine.timeout_secs must be at least 1".to_string()));
        }
        if self.uploads_dir == self.outputs_dir {
            return Err(Error::Config(
                "uploads_dir and outputs_dir must be different directories".to_string(),
            ));
        }
        // The sweep judges workspaces by staging time; a running job's
        // input must outlive the longest engine run
        if self.workspace_max_age_secs <= self.engine.timeout_secs {
            return Err(Error::Config(format!(
                "workspace_max_age_secs ({}) must exceed engine.timeout_secs ({})",
                self.workspace_max_age_secs, self.engine.timeout_secs
            )));
        }
        Ok(())
    }
}
