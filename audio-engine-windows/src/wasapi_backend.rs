//! WASAPI microphone backend.
//!
//! Opens capture endpoints in shared mode and delivers packets in the
//! endpoint's mix format to the installed tap on a dedicated thread
//! registered with MMCSS. COM objects never leave the thread that created
//! them, so the graph itself only holds the endpoint id and plain data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use windows::core::PCWSTR;
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, AUDCLNT_BUFFERFLAGS_SILENT, AUDCLNT_SHAREMODE_SHARED,
    AUDCLNT_STREAMFLAGS_NOPERSIST, WAVEFORMATEX, WAVEFORMATEXTENSIBLE,
};
use windows::Win32::System::Com::{CoTaskMemFree, CLSCTX_ALL};
use windows::Win32::System::Threading::AvSetMmThreadCharacteristicsW;

use audio_engine_core::{
    AudioBackend, AudioFormat, AudioGraph, DeviceIdentity, EngineError, InputCallback,
    NativeSamples, SampleRepresentation,
};

use crate::com::ComApartment;
use crate::device_enumerator::DeviceEnumerator;

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

const E_ACCESSDENIED: i32 = -2147024891;
const AUDCLNT_E_DEVICE_INVALIDATED: i32 = -2004287484;
const AUDCLNT_E_DEVICE_IN_USE: i32 = -2004287478;

/// 100 ms in 100-nanosecond units.
const BUFFER_DURATION: i64 = 1_000_000;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend over the system's WASAPI capture endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasapiBackend;

impl WasapiBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for WasapiBackend {
    type Graph = WasapiGraph;

    fn input_devices(&self) -> Result<Vec<DeviceIdentity>, EngineError> {
        let _com = ComApartment::enter();
        DeviceEnumerator::new()?.list_capture_devices()
    }

    fn open_graph(&self) -> Result<WasapiGraph, EngineError> {
        Ok(WasapiGraph::default())
    }
}

/// One shared-mode capture stream on a single endpoint.
#[derive(Default)]
pub struct WasapiGraph {
    /// `None` follows the system default endpoint.
    device_id: Option<String>,
    format: Option<AudioFormat>,
    tap: Option<InputCallback>,
    running: Arc<AtomicBool>,
    capture_handle: Option<thread::JoinHandle<()>>,
}

impl WasapiGraph {
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }
}

impl AudioGraph for WasapiGraph {
    fn bind_device(&mut self, device: &DeviceIdentity) -> Result<(), EngineError> {
        let _com = ComApartment::enter();
        DeviceEnumerator::new()?.capture_device(Some(&device.handle))?;
        self.device_id = Some(device.handle.clone());
        self.format = None;
        Ok(())
    }

    fn native_format(&mut self) -> Result<AudioFormat, EngineError> {
        if let Some(format) = self.format {
            return Ok(format);
        }
        let _com = ComApartment::enter();
        let client = activate_client(self.device_id.as_deref())?;
        let (format, mix_format_ptr) = unsafe { mix_format(&client)? };
        unsafe { CoTaskMemFree(Some(mix_format_ptr as *const _)) };
        self.format = Some(format);
        Ok(format)
    }

    fn install_tap(&mut self, tap: InputCallback) -> Result<(), EngineError> {
        if self.capture_handle.is_some() {
            return Err(EngineError::ConfigurationFailed(
                "cannot install a tap on a running stream".into(),
            ));
        }
        self.tap = Some(tap);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if self.capture_handle.is_some() {
            return Ok(());
        }
        let tap = self
            .tap
            .take()
            .ok_or_else(|| EngineError::ConfigurationFailed("no tap installed".into()))?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let device_id = self.device_id.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let handle = thread::Builder::new()
            .name("wasapi-input".into())
            .spawn(move || capture_thread(device_id, tap, running, ready_tx))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                EngineError::HardwareStartFailed(format!("failed to spawn capture thread: {}", e))
            })?;
        self.capture_handle = Some(handle);

        let outcome = ready_rx.recv_timeout(STARTUP_TIMEOUT).unwrap_or_else(|_| {
            Err(EngineError::HardwareStartFailed(
                "capture thread did not report startup".into(),
            ))
        });
        if outcome.is_err() {
            self.stop();
        }
        outcome
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.take() {
            if handle.join().is_err() {
                log::error!("WASAPI capture thread panicked");
            }
        }
    }
}

impl Drop for WasapiGraph {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    device_id: Option<String>,
    mut tap: InputCallback,
    running: Arc<AtomicBool>,
    ready: mpsc::SyncSender<Result<(), EngineError>>,
) {
    let _com = ComApartment::enter();
    let stream = match CaptureStream::open(device_id.as_deref()) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    log::debug!("WASAPI capture started: {}", stream.format);
    if let Err(e) = stream.pump(&running, &mut tap) {
        log::error!("WASAPI capture stopped: {}", e);
    }
    running.store(false, Ordering::SeqCst);
}

struct CaptureStream {
    client: IAudioClient,
    capture: IAudioCaptureClient,
    format: AudioFormat,
    /// Endpoint buffer size; no packet is larger.
    buffer_frames: u32,
}

impl CaptureStream {
    /// Activate, initialize in shared mode, register with MMCSS and start.
    fn open(device_id: Option<&str>) -> Result<Self, EngineError> {
        let client = activate_client(device_id)?;
        unsafe {
            let (format, mix_format_ptr) = mix_format(&client)?;
            let initialized = client.Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                AUDCLNT_STREAMFLAGS_NOPERSIST,
                BUFFER_DURATION,
                0,
                mix_format_ptr,
                None,
            );
            CoTaskMemFree(Some(mix_format_ptr as *const _));
            initialized.map_err(|e| map_hresult(e, "IAudioClient::Initialize"))?;

            let capture: IAudioCaptureClient = client
                .GetService()
                .map_err(|e| map_hresult(e, "GetService"))?;
            let buffer_frames = client
                .GetBufferSize()
                .map_err(|e| map_hresult(e, "GetBufferSize"))?;

            let mut task_index: u32 = 0;
            let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
            if AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index).is_err() {
                log::debug!("MMCSS registration unavailable; capturing at normal priority");
            }

            client
                .Start()
                .map_err(|e| map_hresult(e, "IAudioClient::Start"))?;

            Ok(Self {
                client,
                capture,
                format,
                buffer_frames,
            })
        }
    }

    /// Drain packets into `tap` until `running` clears.
    fn pump(&self, running: &AtomicBool, tap: &mut InputCallback) -> Result<(), EngineError> {
        let channels = self.format.channel_count as usize;
        let representation = self.format.representation;
        // Zeroed words reinterpreted as any sample type for silent packets.
        let silence: Vec<u32> = vec![0; self.buffer_frames as usize * channels];

        while running.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
            unsafe {
                let mut packet_length = self
                    .capture
                    .GetNextPacketSize()
                    .map_err(|e| map_hresult(e, "GetNextPacketSize"))?;

                while packet_length > 0 {
                    let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                    let mut num_frames: u32 = 0;
                    let mut flags: u32 = 0;
                    self.capture
                        .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                        .map_err(|e| map_hresult(e, "GetBuffer"))?;

                    let total = num_frames as usize * channels;
                    if total > 0 && !buffer_ptr.is_null() {
                        let silent = flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0;
                        match packet_source(buffer_ptr, silent, &silence, total) {
                            Some(source) => tap(native_slice(representation, source, total)),
                            None => log::debug!("dropping oversized silent packet of {} frames", num_frames),
                        }
                    }

                    self.capture
                        .ReleaseBuffer(num_frames)
                        .map_err(|e| map_hresult(e, "ReleaseBuffer"))?;
                    packet_length = self
                        .capture
                        .GetNextPacketSize()
                        .map_err(|e| map_hresult(e, "GetNextPacketSize"))?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        unsafe {
            let _ = self.client.Stop();
        }
    }
}

/// Where a packet's samples come from: the endpoint buffer, or the zeroed
/// scratch for silent packets. `None` if the scratch is too small.
fn packet_source(buffer: *const u8, silent: bool, silence: &[u32], total: usize) -> Option<*const u8> {
    if !silent {
        return Some(buffer);
    }
    (total <= silence.len()).then(|| silence.as_ptr() as *const u8)
}

/// # Safety
/// `ptr` must point to `len` readable samples of `representation`.
unsafe fn native_slice<'a>(
    representation: SampleRepresentation,
    ptr: *const u8,
    len: usize,
) -> NativeSamples<'a> {
    match representation {
        SampleRepresentation::Float32 => {
            NativeSamples::Float32(std::slice::from_raw_parts(ptr as *const f32, len))
        }
        SampleRepresentation::Int16 => {
            NativeSamples::Int16(std::slice::from_raw_parts(ptr as *const i16, len))
        }
        SampleRepresentation::Int32 => {
            NativeSamples::Int32(std::slice::from_raw_parts(ptr as *const i32, len))
        }
    }
}

fn activate_client(device_id: Option<&str>) -> Result<IAudioClient, EngineError> {
    let device = DeviceEnumerator::new()?.capture_device(device_id)?;
    unsafe {
        device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| map_hresult(e, "Activate"))
    }
}

/// The endpoint's shared-mode mix format. The caller frees the pointer with
/// `CoTaskMemFree`.
unsafe fn mix_format(client: &IAudioClient) -> Result<(AudioFormat, *mut WAVEFORMATEX), EngineError> {
    let ptr = client
        .GetMixFormat()
        .map_err(|e| map_hresult(e, "GetMixFormat"))?;
    let header = std::ptr::read_unaligned(ptr);
    let tag = header.wFormatTag;
    let bits = header.wBitsPerSample;

    let representation = match tag {
        WAVE_FORMAT_IEEE_FLOAT if bits == 32 => Some(SampleRepresentation::Float32),
        WAVE_FORMAT_PCM => pcm_representation(bits),
        WAVE_FORMAT_EXTENSIBLE => {
            let extensible = std::ptr::read_unaligned(ptr as *const WAVEFORMATEXTENSIBLE);
            let sub_format = extensible.SubFormat;
            match sub_format.data1 as u16 {
                WAVE_FORMAT_IEEE_FLOAT if bits == 32 => Some(SampleRepresentation::Float32),
                WAVE_FORMAT_PCM => pcm_representation(bits),
                _ => None,
            }
        }
        _ => None,
    };

    let Some(representation) = representation else {
        CoTaskMemFree(Some(ptr as *const _));
        return Err(EngineError::FormatUnsupported(format!(
            "mix format tag {:#06x} with {} bits per sample",
            tag, bits
        )));
    };

    let format = AudioFormat::new(header.nSamplesPerSec, header.nChannels, representation);
    Ok((format, ptr))
}

fn pcm_representation(bits: u16) -> Option<SampleRepresentation> {
    match bits {
        16 => Some(SampleRepresentation::Int16),
        32 => Some(SampleRepresentation::Int32),
        _ => None,
    }
}

fn map_hresult(error: windows::core::Error, context: &str) -> EngineError {
    match error.code().0 {
        E_ACCESSDENIED => EngineError::PermissionDenied,
        AUDCLNT_E_DEVICE_INVALIDATED => EngineError::DeviceNotAvailable,
        AUDCLNT_E_DEVICE_IN_USE => {
            EngineError::HardwareStartFailed(format!("{}: device in use", context))
        }
        _ => EngineError::HardwareStartFailed(format!("{} failed: {}", context, error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_packets_read_from_preallocated_scratch() {
        let data = [1u8; 16];
        let silence = vec![0u32; 480 * 2];

        assert_eq!(packet_source(data.as_ptr(), false, &silence, 4_000), Some(data.as_ptr()));
        assert_eq!(
            packet_source(data.as_ptr(), true, &silence, 960),
            Some(silence.as_ptr() as *const u8)
        );
        assert_eq!(packet_source(data.as_ptr(), true, &silence, 961), None);
    }

    #[test]
    fn pcm_widths_map_to_representations() {
        assert_eq!(pcm_representation(16), Some(SampleRepresentation::Int16));
        assert_eq!(pcm_representation(32), Some(SampleRepresentation::Int32));
        assert_eq!(pcm_representation(24), None);
    }
}
