use thiserror::Error;

/// Errors produced by engine control operations and platform backends.
///
/// The `Display` text of each variant is what `AudioEngine::last_error`
/// reports after a failed call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("unsupported audio format: {0}")]
    FormatUnsupported(String),

    #[error("hardware start failed: {0}")]
    HardwareStartFailed(String),

    #[error("engine is not running")]
    NotRunning,

    #[error("a capture session is already active")]
    CaptureAlreadyActive,

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}
