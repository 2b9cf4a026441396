//! Capture endpoint enumeration via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list active capture endpoints with their
//! friendly names, which are what callers pass to the engine.

use windows::core::PCWSTR;
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::{
    eCapture, eConsole, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator, DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL, STGM_READ};

use audio_engine_core::{DeviceIdentity, EngineError};

/// Audio device enumerator using the Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> Result<Self, EngineError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| EngineError::Unknown(format!("failed to create enumerator: {}", e)))?;
            Ok(Self { enumerator })
        }
    }

    /// Active capture (microphone) endpoints.
    pub fn list_capture_devices(&self) -> Result<Vec<DeviceIdentity>, EngineError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
                .map_err(|e| EngineError::Unknown(format!("EnumAudioEndpoints failed: {}", e)))?;

            let count = collection
                .GetCount()
                .map_err(|e| EngineError::Unknown(format!("GetCount failed: {}", e)))?;

            let default_id = self.default_capture_device_id().ok();

            let mut devices = Vec::with_capacity(count as usize);
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Some(id) = device_id(&device) else {
                    continue;
                };
                let name = friendly_name(&device).unwrap_or_else(|| format!("Microphone {}", i + 1));
                let is_default = default_id.as_deref() == Some(id.as_str());
                devices.push(DeviceIdentity::new(id, name, is_default));
            }
            Ok(devices)
        }
    }

    /// Endpoint id of the default console capture device.
    pub fn default_capture_device_id(&self) -> Result<String, EngineError> {
        unsafe {
            let device = self
                .enumerator
                .GetDefaultAudioEndpoint(eCapture, eConsole)
                .map_err(|_| EngineError::DeviceNotAvailable)?;
            device_id(&device).ok_or(EngineError::DeviceNotAvailable)
        }
    }

    /// The endpoint for `id`, or the default capture endpoint for `None`.
    ///
    /// Fails with `DeviceNotAvailable` if the endpoint is gone or disabled.
    pub fn capture_device(&self, id: Option<&str>) -> Result<IMMDevice, EngineError> {
        unsafe {
            let device = match id {
                Some(id) => {
                    let wide: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
                    self.enumerator
                        .GetDevice(PCWSTR(wide.as_ptr()))
                        .map_err(|_| EngineError::DeviceNotAvailable)?
                }
                None => self
                    .enumerator
                    .GetDefaultAudioEndpoint(eCapture, eConsole)
                    .map_err(|_| EngineError::DeviceNotAvailable)?,
            };

            let state = device.GetState().map_err(|_| EngineError::DeviceNotAvailable)?;
            if state != DEVICE_STATE_ACTIVE {
                return Err(EngineError::DeviceNotAvailable);
            }
            Ok(device)
        }
    }
}

fn device_id(device: &IMMDevice) -> Option<String> {
    unsafe { device.GetId().ok().and_then(|id| id.to_string().ok()) }
}

/// PKEY_Device_FriendlyName, e.g. "Microphone (USB Audio Device)".
fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        let name = value.to_string();
        (!name.is_empty()).then_some(name)
    }
}
