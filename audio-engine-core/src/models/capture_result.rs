use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_format::AudioFormat;

/// Handed to the caller by `stop_capture`. The caller owns the file at
/// `file_path` and is responsible for reading and deleting it.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult {
    pub file_path: PathBuf,
    pub duration_ms: u64,
    pub sample_count: u64,
    pub checksum: String,
    pub metadata: CaptureMetadata,
}

/// Serializable description of a finished capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub id: String,
    pub created_at: String,
    pub file_path: String,
    pub format: AudioFormat,
    pub duration_ms: u64,
    pub sample_count: u64,
    pub device_switches: u32,
    pub write_failures: u64,
    pub checksum: String,
}
