//! Software input devices.
//!
//! Each device generates a sine tone in its own native format on a dedicated
//! thread. Frames are emitted against the wall clock (frames due = elapsed ×
//! rate), so captured sample counts track real time the way hardware does.
//!
//! The backend handle is `Clone`; keep one copy to add or remove devices,
//! change amplitude or inject faults while the engine owns the other.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::audio_format::{AudioFormat, NativeSamples, SampleRepresentation};
use crate::models::device::DeviceIdentity;
use crate::models::error::EngineError;
use crate::traits::audio_backend::{AudioBackend, AudioGraph, InputCallback};

const TICK: Duration = Duration::from_millis(10);
const DEFAULT_FREQUENCY_HZ: f32 = 440.0;
const DEFAULT_AMPLITUDE: f32 = 0.25;

#[derive(Debug, Clone)]
struct SyntheticDevice {
    identity: DeviceIdentity,
    format: AudioFormat,
    frequency: f32,
    amplitude: Arc<AtomicU32>,
}

#[derive(Debug, Default)]
struct BackendState {
    devices: Vec<SyntheticDevice>,
    next_handle: u32,
    /// Queued injected start failures.
    pending_start_failures: u32,
    fail_next_bind: bool,
    streams_started: u64,
    active_streams: usize,
    peak_active_streams: usize,
}

/// Software audio backend with tone-generating input devices.
#[derive(Debug, Clone, Default)]
pub struct SyntheticBackend {
    state: Arc<Mutex<BackendState>>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with one 48 kHz stereo float device named "Default Microphone".
    pub fn with_default_device() -> Self {
        let backend = Self::new();
        backend.add_device(
            "Default Microphone",
            AudioFormat::new(48_000, 2, SampleRepresentation::Float32),
        );
        backend
    }

    /// Add a device. The first device added is the system default.
    pub fn add_device(&self, name: &str, format: AudioFormat) -> DeviceIdentity {
        let mut state = self.state.lock();
        state.next_handle += 1;
        let identity = DeviceIdentity::new(
            format!("synthetic:{}", state.next_handle),
            name,
            state.devices.is_empty(),
        );
        state.devices.push(SyntheticDevice {
            identity: identity.clone(),
            format,
            frequency: DEFAULT_FREQUENCY_HZ,
            amplitude: Arc::new(AtomicU32::new(DEFAULT_AMPLITUDE.to_bits())),
        });
        identity
    }

    /// Unplug a device. Identities already handed out become stale.
    pub fn remove_device(&self, name: &str) {
        let mut state = self.state.lock();
        state.devices.retain(|d| d.identity.name != name);
        if !state.devices.iter().any(|d| d.identity.is_default) {
            if let Some(first) = state.devices.first_mut() {
                first.identity.is_default = true;
            }
        }
    }

    /// Change the tone amplitude of a device, taking effect on the next buffer.
    pub fn set_amplitude(&self, name: &str, amplitude: f32) {
        let state = self.state.lock();
        for device in state.devices.iter().filter(|d| d.identity.name == name) {
            device.amplitude.store(amplitude.to_bits(), Ordering::Relaxed);
        }
    }

    /// Make the next graph `start` fail with `HardwareStartFailed`.
    ///
    /// Calls accumulate: two calls fail the next two starts.
    pub fn fail_next_start(&self) {
        self.state.lock().pending_start_failures += 1;
    }

    /// Make the next `bind_device` fail as if the identity had gone stale.
    pub fn fail_next_bind(&self) {
        self.state.lock().fail_next_bind = true;
    }

    /// Total number of graph starts since creation.
    pub fn streams_started(&self) -> u64 {
        self.state.lock().streams_started
    }

    /// Graphs currently holding a device.
    pub fn active_streams(&self) -> usize {
        self.state.lock().active_streams
    }

    /// Highest number of graphs that ever held a device at the same time.
    pub fn peak_active_streams(&self) -> usize {
        self.state.lock().peak_active_streams
    }

    fn default_device(&self) -> Option<SyntheticDevice> {
        let state = self.state.lock();
        state
            .devices
            .iter()
            .find(|d| d.identity.is_default)
            .or_else(|| state.devices.first())
            .cloned()
    }
}

impl AudioBackend for SyntheticBackend {
    type Graph = SyntheticGraph;

    fn input_devices(&self) -> Result<Vec<DeviceIdentity>, EngineError> {
        Ok(self.state.lock().devices.iter().map(|d| d.identity.clone()).collect())
    }

    fn open_graph(&self) -> Result<SyntheticGraph, EngineError> {
        let device = self.default_device().ok_or(EngineError::DeviceNotAvailable)?;
        Ok(SyntheticGraph {
            backend: self.clone(),
            device,
            tap: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }
}

/// Input graph over one synthetic device.
pub struct SyntheticGraph {
    backend: SyntheticBackend,
    device: SyntheticDevice,
    tap: Option<InputCallback>,
    running: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SyntheticGraph {
    pub fn bound_device(&self) -> &DeviceIdentity {
        &self.device.identity
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl AudioGraph for SyntheticGraph {
    fn bind_device(&mut self, device: &DeviceIdentity) -> Result<(), EngineError> {
        let mut state = self.backend.state.lock();
        if std::mem::take(&mut state.fail_next_bind) {
            return Err(EngineError::DeviceNotAvailable);
        }
        let found = state
            .devices
            .iter()
            .find(|d| d.identity.same_device(device))
            .cloned()
            .ok_or(EngineError::DeviceNotAvailable)?;
        self.device = found;
        Ok(())
    }

    fn native_format(&mut self) -> Result<AudioFormat, EngineError> {
        Ok(self.device.format)
    }

    fn install_tap(&mut self, tap: InputCallback) -> Result<(), EngineError> {
        self.tap = Some(tap);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if self.worker.is_some() {
            return Ok(());
        }

        {
            let mut state = self.backend.state.lock();
            if state.pending_start_failures > 0 {
                state.pending_start_failures -= 1;
                return Err(EngineError::HardwareStartFailed("injected start failure".into()));
            }
            if !state.devices.iter().any(|d| d.identity.same_device(&self.device.identity)) {
                return Err(EngineError::DeviceNotAvailable);
            }
        }

        let tap = self
            .tap
            .take()
            .ok_or_else(|| EngineError::ConfigurationFailed("no tap installed".into()))?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let device = self.device.clone();

        let handle = thread::Builder::new()
            .name("synthetic-input".into())
            .spawn(move || generate_loop(running, device, tap))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                EngineError::HardwareStartFailed(format!("failed to spawn input thread: {}", e))
            })?;
        self.worker = Some(handle);

        let mut state = self.backend.state.lock();
        state.streams_started += 1;
        state.active_streams += 1;
        state.peak_active_streams = state.peak_active_streams.max(state.active_streams);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.tap = None;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
            let mut state = self.backend.state.lock();
            state.active_streams = state.active_streams.saturating_sub(1);
        }
    }
}

impl Drop for SyntheticGraph {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reused per-representation output buffers.
#[derive(Default)]
struct ToneBuffers {
    float: Vec<f32>,
    int16: Vec<i16>,
    int32: Vec<i32>,
}

fn generate_loop(running: Arc<AtomicBool>, device: SyntheticDevice, mut tap: InputCallback) {
    let rate = device.format.sample_rate as u64;
    let channels = device.format.channel_count as usize;
    let mut buffers = ToneBuffers::default();
    let start = Instant::now();
    let mut emitted: u64 = 0;

    while running.load(Ordering::SeqCst) {
        thread::sleep(TICK);

        let due = (start.elapsed().as_nanos() * rate as u128 / 1_000_000_000) as u64;
        if due <= emitted {
            continue;
        }
        // After a long stall, behave like an overrun and drop the backlog.
        let frames = (due - emitted).min(rate.max(1)) as usize;
        let first_frame = due - frames as u64;

        let amplitude = f32::from_bits(device.amplitude.load(Ordering::Relaxed));
        let samples = fill_tone(
            &mut buffers,
            device.format,
            channels,
            first_frame,
            frames,
            device.frequency,
            amplitude,
        );
        tap(samples);
        emitted = due;
    }
}

fn fill_tone(
    buffers: &mut ToneBuffers,
    format: AudioFormat,
    channels: usize,
    first_frame: u64,
    frames: usize,
    frequency: f32,
    amplitude: f32,
) -> NativeSamples<'_> {
    let rate = format.sample_rate.max(1) as f64;
    let value_at = |frame: usize| -> f32 {
        let t = (first_frame + frame as u64) as f64 / rate;
        amplitude * (2.0 * std::f64::consts::PI * frequency as f64 * t).sin() as f32
    };

    match format.representation {
        SampleRepresentation::Float32 => {
            buffers.float.clear();
            for frame in 0..frames {
                let v = value_at(frame);
                buffers.float.extend(std::iter::repeat(v).take(channels));
            }
            NativeSamples::Float32(&buffers.float)
        }
        SampleRepresentation::Int16 => {
            buffers.int16.clear();
            for frame in 0..frames {
                let v = (value_at(frame).clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                buffers.int16.extend(std::iter::repeat(v).take(channels));
            }
            NativeSamples::Int16(&buffers.int16)
        }
        SampleRepresentation::Int32 => {
            buffers.int32.clear();
            for frame in 0..frames {
                let v = (value_at(frame).clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
                buffers.int32.extend(std::iter::repeat(v).take(channels));
            }
            NativeSamples::Int32(&buffers.int32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn counting_tap(counter: Arc<AtomicU64>) -> InputCallback {
        Box::new(move |samples: NativeSamples<'_>| {
            counter.fetch_add(samples.len() as u64, Ordering::Relaxed);
        })
    }

    #[test]
    fn first_device_is_default() {
        let backend = SyntheticBackend::new();
        let a = backend.add_device("A", AudioFormat::target());
        let b = backend.add_device("B", AudioFormat::target());
        assert!(a.is_default);
        assert!(!b.is_default);
        assert_ne!(a.handle, b.handle);
    }

    #[test]
    fn open_graph_without_devices_fails() {
        let backend = SyntheticBackend::new();
        assert!(matches!(backend.open_graph(), Err(EngineError::DeviceNotAvailable)));
    }

    #[test]
    fn start_requires_tap() {
        let backend = SyntheticBackend::with_default_device();
        let mut graph = backend.open_graph().unwrap();
        assert!(matches!(graph.start(), Err(EngineError::ConfigurationFailed(_))));
    }

    #[test]
    fn injected_start_failure_is_one_shot() {
        let backend = SyntheticBackend::with_default_device();
        backend.fail_next_start();

        let counter = Arc::new(AtomicU64::new(0));
        let mut graph = backend.open_graph().unwrap();
        graph.install_tap(counting_tap(Arc::clone(&counter))).unwrap();
        assert!(matches!(graph.start(), Err(EngineError::HardwareStartFailed(_))));

        graph.start().unwrap();
        assert!(graph.is_running());
        graph.stop();
    }

    #[test]
    fn injected_start_failures_queue_up() {
        let backend = SyntheticBackend::with_default_device();
        backend.fail_next_start();
        backend.fail_next_start();

        let counter = Arc::new(AtomicU64::new(0));
        let mut graph = backend.open_graph().unwrap();
        graph.install_tap(counting_tap(Arc::clone(&counter))).unwrap();
        assert!(graph.start().is_err());
        assert!(graph.start().is_err());
        graph.start().unwrap();
        assert_eq!(backend.streams_started(), 1);
        graph.stop();
    }

    #[test]
    fn delivers_frames_at_real_time_rate() {
        let backend = SyntheticBackend::new();
        backend.add_device("Mono 16k", AudioFormat::target());

        let counter = Arc::new(AtomicU64::new(0));
        let mut graph = backend.open_graph().unwrap();
        graph.install_tap(counting_tap(Arc::clone(&counter))).unwrap();
        graph.start().unwrap();
        assert_eq!(backend.active_streams(), 1);

        thread::sleep(Duration::from_millis(500));
        graph.stop();
        assert_eq!(backend.active_streams(), 0);

        let delivered = counter.load(Ordering::Relaxed);
        assert!((6_400..=8_800).contains(&delivered), "delivered {}", delivered);
    }

    #[test]
    fn stop_is_idempotent_and_tracks_streams() {
        let backend = SyntheticBackend::with_default_device();
        let mut graph = backend.open_graph().unwrap();
        graph.install_tap(counting_tap(Arc::new(AtomicU64::new(0)))).unwrap();
        graph.start().unwrap();
        graph.stop();
        graph.stop();
        assert_eq!(backend.streams_started(), 1);
        assert_eq!(backend.active_streams(), 0);
        assert_eq!(backend.peak_active_streams(), 1);
    }

    #[test]
    fn int16_tone_respects_amplitude() {
        let mut buffers = ToneBuffers::default();
        let format = AudioFormat::new(8_000, 2, SampleRepresentation::Int16);
        let samples = fill_tone(&mut buffers, format, 2, 0, 80, 100.0, 0.5);
        match samples {
            NativeSamples::Int16(s) => {
                assert_eq!(s.len(), 160);
                let peak = s.iter().map(|v| v.unsigned_abs()).max().unwrap();
                assert!(peak <= (i16::MAX / 2) as u16 + 1);
                assert!(peak > (i16::MAX / 4) as u16);
            }
            other => panic!("unexpected representation {:?}", other.representation()),
        }
    }
}
