//! # audio-engine-windows
//!
//! Windows WASAPI backend for the dictation audio engine.
//!
//! Provides:
//! - `WasapiBackend` / `WasapiGraph`: shared-mode microphone capture
//! - `DeviceEnumerator`: capture endpoint enumeration via the MMDevice API
//!
//! ## Usage
//! ```ignore
//! use audio_engine_core::{AudioEngine, EngineConfiguration};
//! use audio_engine_windows::WasapiBackend;
//!
//! let engine = AudioEngine::new(WasapiBackend::new(), EngineConfiguration::default())?;
//! engine.start_engine(None)?;
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod wasapi_backend;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use wasapi_backend::{WasapiBackend, WasapiGraph};
