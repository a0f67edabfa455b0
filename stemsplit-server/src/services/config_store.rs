//! Model configuration file consulted at job time
//!
//! The separation engine reads the full YAML file itself; this service only
//! needs `training.target_instrument`, which names the vocal stem file.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("Failed to read config store {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config store: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("training.target_instrument is missing or empty")]
    MissingTargetInstrument,

    #[error("training.target_instrument {0:?} is not a valid file name component")]
    InvalidTargetInstrument(String),
}

#[derive(Debug, Deserialize)]
struct ModelConfig {
    training: Option<TrainingSection>,
}

#[derive(Debug, Deserialize)]
struct TrainingSection {
    target_instrument: Option<String>,
}

/// Read the target instrument from the YAML file at `path`
pub async fn load_target_instrument(path: &Path) -> Result<String, ConfigStoreError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigStoreError::Read {
            path: path.display().to_string(),
            source,
        })?;
    parse_target_instrument(&content)
}

/// Extract `training.target_instrument` from YAML text
pub fn parse_target_instrument(content: &str) -> Result<String, ConfigStoreError> {
    let config: ModelConfig = serde_yaml::from_str(content)?;

    let target = config
        .training
        .and_then(|t| t.target_instrument)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(ConfigStoreError::MissingTargetInstrument)?;

    if target.contains(['/', '\\']) || target == "." || target == ".." {
        return Err(ConfigStoreError::InvalidTargetInstrument(target));
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_target_instrument_among_other_keys() {
        let yaml = r#"
audio:
  chunk_size: 352800
  num_channels: 2
  sample_rate: 44100
model:
  dim: 384
  depth: 6
training:
  batch_size: 4
  instruments:
    - vocals
    - other
  target_instrument: vocals
  use_amp: true
inference:
  num_overlap: 2
"#;
        assert_eq!(parse_target_instrument(yaml).unwrap(), "vocals");
    }

    #[test]
    fn test_missing_training_section() {
        let result = parse_target_instrument("model:\n  dim: 384\n");
        assert!(matches!(result, Err(ConfigStoreError::MissingTargetInstrument)));
    }

    #[test]
    fn test_null_target_instrument() {
        let result = parse_target_instrument("training:\n  target_instrument: null\n");
        assert!(matches!(result, Err(ConfigStoreError::MissingTargetInstrument)));
    }

    #[test]
    fn test_rejects_path_like_target() {
        let result = parse_target_instrument("training:\n  target_instrument: ../vocals\n");
        assert!(matches!(
            result,
            Err(ConfigStoreError::InvalidTargetInstrument(_))
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = parse_target_instrument("training: [unclosed\n");
        assert!(matches!(result, Err(ConfigStoreError::Parse(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let result = load_target_instrument(Path::new("/nonexistent/stemsplit/config.yaml")).await;
        assert!(matches!(result, Err(ConfigStoreError::Read { .. })));
    }
}
