use std::fs;
use std::path::PathBuf;

use super::error::EngineError;

/// Configuration for an [`AudioEngine`](crate::AudioEngine).
#[derive(Debug, Clone)]
pub struct EngineConfiguration {
    /// Directory where capture files are created (default: OS temp dir).
    pub output_directory: PathBuf,

    /// Write `<capture>.metadata.json` next to each finished capture.
    pub write_metadata_sidecar: bool,
}

impl EngineConfiguration {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.output_directory.as_os_str().is_empty() {
            return Err(EngineError::ConfigurationFailed(
                "output directory must not be empty".into(),
            ));
        }
        fs::create_dir_all(&self.output_directory).map_err(|e| {
            EngineError::ConfigurationFailed(format!(
                "cannot create output directory {}: {}",
                self.output_directory.display(),
                e
            ))
        })?;
        Ok(())
    }

    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = dir.into();
        self
    }
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            output_directory: std::env::temp_dir(),
            write_metadata_sidecar: false,
        }
    }
}
