//! Service configuration
//!
//! Resolution priority: command-line / environment overrides → TOML file →
//! built-in defaults. See `stemsplit_common::config` for file lookup.

use std::path::PathBuf;
use std::time::Duration;
use stemsplit_common::config::{
    load_toml_config, ConfigFileResolver, EngineConfig, OutputLayout, TomlConfig,
};
use stemsplit_common::Result;
use tracing::info;

/// Values given on the command line (or their environment variables)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Where the settings came from
///
/// Resolution happens before logging is set up, so `main` reports this once
/// the subscriber is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// A config path was given but no file exists there
    Missing(PathBuf),
    Defaults,
}

/// Effective configuration of a running service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub source: ConfigSource,
    pub host: String,
    pub port: u16,
    pub uploads_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub output_layout: OutputLayout,
    pub max_concurrent_jobs: usize,
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
    pub workspace_max_age: Duration,
    pub engine: EngineConfig,
    pub log_level: String,
}

impl ServiceConfig {
    /// Locate and load the config file, then apply overrides
    pub fn resolve(overrides: &CliOverrides) -> Result<Self> {
        let path = ConfigFileResolver::new(overrides.config.clone()).resolve();
        let toml = load_toml_config(path.as_deref())?;
        let source = match path {
            Some(path) if path.exists() => ConfigSource::File(path),
            Some(path) => ConfigSource::Missing(path),
            None => ConfigSource::Defaults,
        };
        Ok(Self {
            source,
            ..Self::from_toml(toml, overrides)
        })
    }

    pub fn from_toml(toml: TomlConfig, overrides: &CliOverrides) -> Self {
        Self {
            source: ConfigSource::Defaults,
            host: overrides.host.clone().unwrap_or(toml.host),
            port: overrides.port.unwrap_or(toml.port),
            uploads_dir: toml.uploads_dir,
            outputs_dir: toml.outputs_dir,
            output_layout: toml.output_layout,
            max_concurrent_jobs: toml.max_concurrent_jobs,
            max_upload_bytes: toml.max_upload_bytes,
            cors_origins: toml.cors_origins,
            workspace_max_age: Duration::from_secs(toml.workspace_max_age_secs),
            engine: toml.engine,
            log_level: toml.logging.level,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Create the upload and output roots if missing
    pub async fn ensure_directories(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        tokio::fs::create_dir_all(&self.outputs_dir).await?;
        info!(
            "Uploads: {}, outputs: {}",
            self.uploads_dir.display(),
            self.outputs_dir.display()
        );
        Ok(())
    }
}
