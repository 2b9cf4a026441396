use crate::models::audio_format::{AudioFormat, NativeSamples};
use crate::models::device::DeviceIdentity;
use crate::models::error::EngineError;

/// Tap invoked once per hardware buffer on the backend's real-time thread.
///
/// Samples are interleaved in the graph's native format. Keep work minimal:
/// no blocking, no unbounded allocation.
pub type InputCallback = Box<dyn FnMut(NativeSamples<'_>) + Send + 'static>;

/// Platform audio subsystem: device enumeration plus a factory for input graphs.
///
/// Implemented by:
/// - `SyntheticBackend` (software tone generator, all platforms)
/// - `WasapiBackend` (Windows)
pub trait AudioBackend: Send + 'static {
    type Graph: AudioGraph;

    /// All input devices currently present.
    fn input_devices(&self) -> Result<Vec<DeviceIdentity>, EngineError>;

    /// Create an idle graph bound to the system default input device.
    fn open_graph(&self) -> Result<Self::Graph, EngineError>;
}

/// One input node plus its tap. Owned exclusively by the engine.
pub trait AudioGraph: Send {
    /// Rebind the input node. On error the previous binding is kept.
    fn bind_device(&mut self, device: &DeviceIdentity) -> Result<(), EngineError>;

    /// Hardware format of the bound device. Only valid after binding.
    fn native_format(&mut self) -> Result<AudioFormat, EngineError>;

    /// Install the real-time tap. Replaces any previous tap.
    fn install_tap(&mut self, tap: InputCallback) -> Result<(), EngineError>;

    /// Start delivering buffers to the tap.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Stop delivery and release the hardware. Idempotent.
    fn stop(&mut self);
}
