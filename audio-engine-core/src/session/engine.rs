use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::audio_format::AudioFormat;
use crate::models::capture_result::{CaptureMetadata, CaptureResult};
use crate::models::config::EngineConfiguration;
use crate::models::device::DeviceIdentity;
use crate::models::error::EngineError;
use crate::models::state::EngineState;
use crate::models::status::EngineStatus;
use crate::processing::format_converter::{build_converter, build_target_format};
use crate::storage::capture_writer::CaptureWriter;
use crate::storage::metadata;
use crate::traits::audio_backend::{AudioBackend, AudioGraph};

use super::device_selector;
use super::shared::{CaptureSession, CaptureSlot, SharedStatus};
use super::tap::TapProcessor;

/// Pause between rebinding the hardware device and reinstalling the tap.
///
/// Platform audio stacks need time to propagate a device change; this runs on
/// the control thread only.
pub const DEVICE_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Process-wide audio engine: one input graph feeding both the level meter
/// and, while a capture session is active, the capture file.
///
/// Construct once and share by `Arc`. Control operations (`start_engine`,
/// `stop_engine`, `set_device`, `start_capture`, `stop_capture`) are queued to
/// a single control thread and run one at a time in submission order. Queries
/// read shared status directly and never wait on a control operation.
///
/// ```text
/// [Hardware] → tap → [Converter] → [LevelMonitor] → level
///                                 └→ [CaptureWriter] → capture_<id>.wav
/// ```
///
/// Every failed control operation also records its error, readable via
/// [`last_error`](Self::last_error).
pub struct AudioEngine {
    commands: Sender<ControlCommand>,
    status: Arc<SharedStatus>,
    worker: Option<thread::JoinHandle<()>>,
}

enum ControlCommand {
    StartEngine {
        device: Option<String>,
        reply: Sender<Result<(), EngineError>>,
    },
    StopEngine {
        reply: Sender<()>,
    },
    SetDevice {
        device: Option<String>,
        reply: Sender<Result<(), EngineError>>,
    },
    StartCapture {
        reply: Sender<Result<(), EngineError>>,
    },
    StopCapture {
        reply: Sender<Option<CaptureResult>>,
    },
    InputDevices {
        reply: Sender<Result<Vec<DeviceIdentity>, EngineError>>,
    },
    Shutdown,
}

impl AudioEngine {
    /// Spawn the control thread, which takes ownership of `backend`.
    pub fn new<B: AudioBackend>(backend: B, config: EngineConfiguration) -> Result<Self, EngineError> {
        config.validate()?;

        let status = Arc::new(SharedStatus::default());
        let (commands, receiver) = mpsc::channel();
        let core = EngineCore {
            backend,
            config,
            graph: None,
            status: Arc::clone(&status),
            capture: Arc::new(Mutex::new(None)),
        };

        let worker = thread::Builder::new()
            .name("audio-engine-control".into())
            .spawn(move || control_loop(core, receiver))
            .map_err(|e| EngineError::Unknown(format!("failed to spawn control thread: {}", e)))?;

        Ok(Self {
            commands,
            status,
            worker: Some(worker),
        })
    }

    /// Start the graph on `device` (exact display name) or the system default.
    ///
    /// Already running on the same device: no-op. Running on another device:
    /// switches devices, keeping any capture session. An unknown name falls
    /// back to the default device with a warning.
    pub fn start_engine(&self, device: Option<&str>) -> Result<(), EngineError> {
        let device = device.map(str::to_owned);
        self.request(|reply| ControlCommand::StartEngine { device, reply })?
    }

    /// Tear the graph down. An active capture session is discarded and its
    /// file deleted. No-op when idle.
    pub fn stop_engine(&self) {
        if self.request(|reply| ControlCommand::StopEngine { reply }).is_err() {
            log::warn!("stop_engine: control thread is gone");
        }
    }

    /// Move the running graph to another device, keeping any capture session.
    pub fn set_device(&self, device: Option<&str>) -> Result<(), EngineError> {
        let device = device.map(str::to_owned);
        self.request(|reply| ControlCommand::SetDevice { device, reply })?
    }

    /// Open a new capture file. Requires a running engine and no active session.
    pub fn start_capture(&self) -> Result<(), EngineError> {
        self.request(|reply| ControlCommand::StartCapture { reply })?
    }

    /// Finalize the active capture and hand its file to the caller, who owns
    /// reading and deleting it. `None` if no session was active.
    pub fn stop_capture(&self) -> Option<CaptureResult> {
        self.request(|reply| ControlCommand::StopCapture { reply })
            .ok()
            .flatten()
    }

    /// Input devices as reported by the backend.
    pub fn input_devices(&self) -> Result<Vec<DeviceIdentity>, EngineError> {
        self.request(|reply| ControlCommand::InputDevices { reply })?
    }

    pub fn state(&self) -> EngineState {
        self.status.state()
    }

    pub fn is_running(&self) -> bool {
        self.status.state().is_running()
    }

    pub fn is_capturing(&self) -> bool {
        self.status.state().is_capturing()
    }

    /// Most recent meter reading, 0..=100.
    pub fn level(&self) -> u8 {
        self.status.level()
    }

    /// Wall-clock length of the active capture session; 0 when not capturing.
    pub fn duration_ms(&self) -> u64 {
        self.status.duration_ms()
    }

    /// Samples written to the active capture file so far.
    pub fn sample_count(&self) -> u64 {
        self.status.sample_count()
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.last_error()
    }

    /// Display name of the explicitly bound device; `None` on the system default.
    pub fn current_device(&self) -> Option<String> {
        self.status.device()
    }

    pub fn status(&self) -> EngineStatus {
        self.status.snapshot()
    }

    fn request<T>(&self, command: impl FnOnce(Sender<T>) -> ControlCommand) -> Result<T, EngineError> {
        let (reply, response) = mpsc::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| self.control_thread_gone())?;
        response.recv().map_err(|_| self.control_thread_gone())
    }

    fn control_thread_gone(&self) -> EngineError {
        let error = EngineError::Unknown("engine control thread stopped".into());
        self.status.set_error(error.to_string());
        error
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let _ = self.commands.send(ControlCommand::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn control_loop<B: AudioBackend>(mut core: EngineCore<B>, commands: Receiver<ControlCommand>) {
    // Replies are best-effort: a caller that gave up is not an engine error.
    for command in commands {
        match command {
            ControlCommand::StartEngine { device, reply } => {
                let _ = reply.send(core.start_engine(device.as_deref()));
            }
            ControlCommand::StopEngine { reply } => {
                core.stop_engine();
                let _ = reply.send(());
            }
            ControlCommand::SetDevice { device, reply } => {
                let _ = reply.send(core.set_device(device.as_deref()));
            }
            ControlCommand::StartCapture { reply } => {
                let _ = reply.send(core.start_capture());
            }
            ControlCommand::StopCapture { reply } => {
                let _ = reply.send(core.stop_capture());
            }
            ControlCommand::InputDevices { reply } => {
                let _ = reply.send(device_selector::input_devices(&core.backend));
            }
            ControlCommand::Shutdown => break,
        }
    }
    core.stop_engine();
}

/// A started graph and what it was built for.
struct ActiveGraph<G: AudioGraph> {
    graph: G,
    /// Explicitly bound device; `None` when running on the system default.
    device: Option<DeviceIdentity>,
    /// Device the stream actually runs on, the resolved default included.
    identity: Option<DeviceIdentity>,
    native: AudioFormat,
}

/// Engine lifecycle manager. Lives on the control thread only.
struct EngineCore<B: AudioBackend> {
    backend: B,
    config: EngineConfiguration,
    graph: Option<ActiveGraph<B::Graph>>,
    status: Arc<SharedStatus>,
    capture: CaptureSlot,
}

impl<B: AudioBackend> EngineCore<B> {
    fn start_engine(&mut self, device: Option<&str>) -> Result<(), EngineError> {
        if let Some(active) = &self.graph {
            if self.is_bound_to(active, device) {
                return Ok(());
            }
            return self.switch_device(device);
        }

        self.status.clear_error();
        self.status.publish_level(0);

        match self.build_graph(device, false) {
            Ok(active) => {
                log::info!(
                    "audio engine started on {} ({})",
                    describe(active.device.as_ref()),
                    active.native
                );
                self.status.set_device(active.device.as_ref().map(|d| d.name.clone()));
                self.status.set_state(EngineState::Running);
                self.graph = Some(active);
                Ok(())
            }
            Err(e) => {
                self.status.reset_idle();
                Err(self.fail("start_engine", e))
            }
        }
    }

    fn stop_engine(&mut self) {
        let Some(mut active) = self.graph.take() else {
            return;
        };
        active.graph.stop();

        if let Some(session) = self.capture.lock().take() {
            log::warn!(
                "engine stopped during capture {}; discarding {}",
                session.id,
                session.writer.file_path().display()
            );
            session.writer.discard();
        }

        self.status.reset_idle();
        log::info!("audio engine stopped");
    }

    fn set_device(&mut self, device: Option<&str>) -> Result<(), EngineError> {
        let Some(active) = &self.graph else {
            return Err(self.fail("set_device", EngineError::NotRunning));
        };
        if self.is_bound_to(active, device) {
            return Ok(());
        }
        self.switch_device(device)
    }

    /// Tear down and rebuild on another device with the capture session
    /// detached, then reattach it.
    ///
    /// If the new device cannot be started the previous one is restored; if
    /// that fails too the engine goes idle and the session is discarded.
    fn switch_device(&mut self, device: Option<&str>) -> Result<(), EngineError> {
        let Some(mut previous) = self.graph.take() else {
            return Err(self.fail("set_device", EngineError::NotRunning));
        };
        let session = self.capture.lock().take();
        let was_capturing = session.is_some();
        previous.graph.stop();
        let previous_device = previous.device.as_ref().map(|d| d.name.clone());
        drop(previous);

        let outcome = match self.build_graph(device, true) {
            Ok(active) => Ok(active),
            Err(e) => {
                log::warn!(
                    "switching to {} failed ({}); restoring {}",
                    device.unwrap_or("default device"),
                    e,
                    previous_device.as_deref().unwrap_or("default device")
                );
                match self.build_graph(previous_device.as_deref(), true) {
                    Ok(active) => {
                        self.reattach(active, session, false);
                        return Err(self.fail("set_device", e));
                    }
                    Err(restore) => {
                        log::error!("restoring previous device failed: {}", restore);
                        Err(e)
                    }
                }
            }
        };

        match outcome {
            Ok(active) => {
                log::info!(
                    "audio engine switched to {} ({}){}",
                    describe(active.device.as_ref()),
                    active.native,
                    if was_capturing { ", capture kept" } else { "" }
                );
                self.reattach(active, session, true);
                Ok(())
            }
            Err(e) => {
                if let Some(session) = session {
                    session.writer.discard();
                }
                self.status.reset_idle();
                Err(self.fail("set_device", e))
            }
        }
    }

    fn reattach(&mut self, active: ActiveGraph<B::Graph>, session: Option<CaptureSession>, switched: bool) {
        self.status.set_device(active.device.as_ref().map(|d| d.name.clone()));
        self.graph = Some(active);
        if let Some(mut session) = session {
            if switched {
                session.device_switches += 1;
            }
            *self.capture.lock() = Some(session);
        }
    }

    fn start_capture(&mut self) -> Result<(), EngineError> {
        if self.graph.is_none() {
            return Err(self.fail("start_capture", EngineError::NotRunning));
        }
        if self.capture.lock().is_some() {
            return Err(self.fail("start_capture", EngineError::CaptureAlreadyActive));
        }

        let id = uuid::Uuid::new_v4();
        let path = self.capture_path(&id);
        let writer = match CaptureWriter::create(path, build_target_format(), self.status.sample_counter()) {
            Ok(writer) => writer,
            Err(e) => return Err(self.fail("start_capture", e)),
        };

        let started_at = Instant::now();
        log::info!("capture {} started: {}", id, writer.file_path().display());
        self.status.mark_capture_started(started_at);
        *self.capture.lock() = Some(CaptureSession {
            id,
            writer,
            started_at,
            created_at: chrono::Utc::now(),
            device_switches: 0,
        });
        Ok(())
    }

    fn stop_capture(&mut self) -> Option<CaptureResult> {
        let session = self.capture.lock().take()?;
        let duration_ms = session.started_at.elapsed().as_millis() as u64;
        let write_failures = session.writer.write_failures();
        let format = *session.writer.format();
        let file_path = session.writer.file_path().to_path_buf();

        self.status.mark_capture_stopped(if self.graph.is_some() {
            EngineState::Running
        } else {
            EngineState::Idle
        });

        let finalized = match session.writer.finalize() {
            Ok(finalized) => finalized,
            Err(e) => {
                if let Err(remove) = std::fs::remove_file(&file_path) {
                    log::debug!("could not remove unfinished capture: {}", remove);
                }
                self.fail("stop_capture", e);
                return None;
            }
        };

        let metadata = CaptureMetadata {
            id: session.id.to_string(),
            created_at: session.created_at.to_rfc3339(),
            file_path: finalized.file_path.to_string_lossy().into_owned(),
            format,
            duration_ms,
            sample_count: finalized.sample_count,
            device_switches: session.device_switches,
            write_failures,
            checksum: finalized.checksum.clone(),
        };

        if self.config.write_metadata_sidecar {
            if let Err(e) = metadata::write_metadata(&metadata, &finalized.file_path) {
                log::warn!("capture {}: {}", session.id, e);
            }
        }

        log::info!(
            "capture {} finished: {} samples, {} ms, {} device switch(es)",
            session.id,
            finalized.sample_count,
            duration_ms,
            session.device_switches
        );

        Some(CaptureResult {
            file_path: finalized.file_path,
            duration_ms,
            sample_count: finalized.sample_count,
            checksum: finalized.checksum,
            metadata,
        })
    }

    /// Whether a start/switch request for `device` would land on the device
    /// the graph is already bound to.
    ///
    /// `None` and unknown names both mean the current system default.
    fn is_bound_to(&self, active: &ActiveGraph<B::Graph>, device: Option<&str>) -> bool {
        let wanted = device
            .and_then(|name| device_selector::resolve_device(&self.backend, name))
            .or_else(|| device_selector::default_device(&self.backend));
        match (&wanted, &active.identity) {
            (Some(wanted), Some(running)) => wanted.same_device(running),
            (None, None) => active.device.is_none(),
            _ => false,
        }
    }

    /// Open, bind, format, tap and start a graph.
    fn build_graph(&self, device: Option<&str>, settle: bool) -> Result<ActiveGraph<B::Graph>, EngineError> {
        let mut graph = self.backend.open_graph()?;

        let mut bound = None;
        if let Some(name) = device {
            match device_selector::resolve_device(&self.backend, name) {
                Some(identity) => {
                    if device_selector::bind_device(&identity, &mut graph) {
                        bound = Some(identity);
                    }
                }
                None => log::warn!("input device '{}' not found; using system default", name),
            }
        }

        if settle {
            thread::sleep(DEVICE_SETTLE_DELAY);
        }

        let native = graph.native_format()?;
        let converter = build_converter(&native, &build_target_format())?;
        let tap = TapProcessor::new(converter, Arc::clone(&self.status), Arc::clone(&self.capture));
        graph.install_tap(tap.into_callback())?;

        if let Err(e) = graph.start() {
            graph.stop();
            return Err(e);
        }

        let identity = bound.clone().or_else(|| device_selector::default_device(&self.backend));
        Ok(ActiveGraph {
            graph,
            device: bound,
            identity,
            native,
        })
    }

    fn capture_path(&self, id: &uuid::Uuid) -> PathBuf {
        self.config.output_directory.join(format!("capture_{}.wav", id))
    }

    fn fail(&self, operation: &str, error: EngineError) -> EngineError {
        log::warn!("{} failed: {}", operation, error);
        self.status.set_error(error.to_string());
        error
    }
}

fn describe(device: Option<&DeviceIdentity>) -> String {
    match device {
        Some(d) => format!("'{}'", d.name),
        None => "system default device".into(),
    }
}
