use std::fs;
use std::path::{Path, PathBuf};

use crate::models::capture_result::CaptureMetadata;
use crate::models::error::EngineError;

/// Sidecar location for a capture file: `{capture}.metadata.json`.
pub fn metadata_path(capture_path: &Path) -> PathBuf {
    capture_path.with_extension("metadata.json")
}

/// Write capture metadata as a JSON sidecar file.
pub fn write_metadata(metadata: &CaptureMetadata, capture_path: &Path) -> Result<PathBuf, EngineError> {
    let path = metadata_path(capture_path);
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| EngineError::StorageError(format!("failed to serialize metadata: {}", e)))?;
    fs::write(&path, json)
        .map_err(|e| EngineError::StorageError(format!("failed to write metadata: {}", e)))?;
    Ok(path)
}

/// Read capture metadata from its JSON sidecar file.
pub fn read_metadata(capture_path: &Path) -> Result<CaptureMetadata, EngineError> {
    let json = fs::read_to_string(metadata_path(capture_path))
        .map_err(|e| EngineError::StorageError(format!("failed to read metadata: {}", e)))?;
    serde_json::from_str(&json)
        .map_err(|e| EngineError::StorageError(format!("failed to parse metadata: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_format::AudioFormat;

    #[test]
    fn sidecar_sits_next_to_capture() {
        let path = Path::new("/tmp/capture_abc.wav");
        assert_eq!(metadata_path(path), Path::new("/tmp/capture_abc.metadata.json"));
    }

    #[test]
    fn write_then_read_back() {
        let capture = std::env::temp_dir().join(format!("capture_{}.wav", uuid::Uuid::new_v4()));
        let metadata = CaptureMetadata {
            id: "id-1".into(),
            created_at: "2026-01-01T00:00:00+00:00".into(),
            file_path: capture.to_string_lossy().into_owned(),
            format: AudioFormat::target(),
            duration_ms: 2_000,
            sample_count: 32_000,
            device_switches: 1,
            write_failures: 0,
            checksum: "ab".repeat(32),
        };

        let sidecar = write_metadata(&metadata, &capture).unwrap();
        let json = fs::read_to_string(&sidecar).unwrap();
        assert!(json.contains("\"device_switches\": 1"));
        assert!(json.contains("\"representation\": \"float32\""));
        assert_eq!(read_metadata(&capture).unwrap(), metadata);

        fs::remove_file(&sidecar).ok();
    }

    #[test]
    fn missing_sidecar_is_storage_error() {
        let capture = std::env::temp_dir().join(format!("missing_{}.wav", uuid::Uuid::new_v4()));
        assert!(matches!(read_metadata(&capture), Err(EngineError::StorageError(_))));
    }
}
