//! # audio-engine-core
//!
//! Platform-agnostic dictation audio engine.
//!
//! A single input graph serves two consumers at once: a continuous level
//! meter for UI feedback and, on demand, lossless file-backed capture for
//! transcription. Keeping both on one graph means the input device is claimed
//! exactly once, so a capture session survives device switches.
//!
//! Platform backends (Windows WASAPI, or the software `SyntheticBackend`)
//! implement `AudioBackend` / `AudioGraph` and plug into `AudioEngine`.
//!
//! ## Architecture
//!
//! ```text
//! audio-engine-core (this crate)
//! ├── traits/       ← AudioBackend, AudioGraph, InputCallback
//! ├── models/       ← EngineError, EngineState, AudioFormat, DeviceIdentity, config, results
//! ├── processing/   ← format converter, level monitor, WAV layout
//! ├── session/      ← AudioEngine (lifecycle + control queue), device selector, tap
//! ├── storage/      ← CaptureWriter, metadata sidecar
//! └── backends/     ← SyntheticBackend
//! ```
//!
//! ## Usage
//! ```no_run
//! use audio_engine_core::{AudioEngine, EngineConfiguration, SyntheticBackend};
//!
//! let engine = AudioEngine::new(SyntheticBackend::with_default_device(), EngineConfiguration::default())?;
//! engine.start_engine(None)?;
//! engine.start_capture()?;
//! // ... poll engine.level() for the meter ...
//! if let Some(capture) = engine.stop_capture() {
//!     println!("{} samples in {}", capture.sample_count, capture.file_path.display());
//! }
//! engine.stop_engine();
//! # Ok::<(), audio_engine_core::EngineError>(())
//! ```

pub mod backends;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use backends::synthetic::{SyntheticBackend, SyntheticGraph};
pub use models::audio_format::{AudioFormat, NativeSamples, SampleRepresentation};
pub use models::capture_result::{CaptureMetadata, CaptureResult};
pub use models::config::EngineConfiguration;
pub use models::device::DeviceIdentity;
pub use models::error::EngineError;
pub use models::state::EngineState;
pub use models::status::EngineStatus;
pub use processing::format_converter::Converter;
pub use processing::level_monitor::LevelMonitor;
pub use session::engine::{AudioEngine, DEVICE_SETTLE_DELAY};
pub use storage::capture_writer::CaptureWriter;
pub use traits::audio_backend::{AudioBackend, AudioGraph, InputCallback};
