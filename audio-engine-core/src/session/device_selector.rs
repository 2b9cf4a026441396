//! Name → device resolution and binding.
//!
//! The selector is the only place that maps display names to opaque device
//! handles. Matching is exact; anything else is "not found" and the caller
//! falls back to the system default.

use crate::models::device::DeviceIdentity;
use crate::models::error::EngineError;
use crate::traits::audio_backend::{AudioBackend, AudioGraph};

/// All input devices the backend currently reports.
pub fn input_devices<B: AudioBackend>(backend: &B) -> Result<Vec<DeviceIdentity>, EngineError> {
    backend.input_devices()
}

/// Find the input device whose display name is exactly `name`.
///
/// Enumeration failures are logged and read as "not found".
pub fn resolve_device<B: AudioBackend>(backend: &B, name: &str) -> Option<DeviceIdentity> {
    match backend.input_devices() {
        Ok(devices) => devices.into_iter().find(|d| d.name == name),
        Err(e) => {
            log::warn!("input device enumeration failed while resolving '{}': {}", name, e);
            None
        }
    }
}

/// The device the backend reports as the system default, if any.
pub fn default_device<B: AudioBackend>(backend: &B) -> Option<DeviceIdentity> {
    match backend.input_devices() {
        Ok(devices) => devices.into_iter().find(|d| d.is_default),
        Err(e) => {
            log::warn!("input device enumeration failed while looking up the default: {}", e);
            None
        }
    }
}

/// Attach `identity` to the graph's input node.
///
/// Returns `false` if the identity is stale or the platform refuses the
/// binding; the graph keeps its previous (default) binding.
pub fn bind_device<G: AudioGraph>(identity: &DeviceIdentity, graph: &mut G) -> bool {
    match graph.bind_device(identity) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("failed to bind input device '{}': {}", identity.name, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::synthetic::SyntheticBackend;
    use crate::models::audio_format::{AudioFormat, SampleRepresentation};

    fn backend() -> SyntheticBackend {
        let backend = SyntheticBackend::new();
        backend.add_device("Built-in Microphone", AudioFormat::new(48_000, 2, SampleRepresentation::Float32));
        backend.add_device("USB Headset", AudioFormat::new(44_100, 1, SampleRepresentation::Int16));
        backend
    }

    #[test]
    fn resolves_exact_name_only() {
        let backend = backend();
        let found = resolve_device(&backend, "USB Headset").unwrap();
        assert_eq!(found.name, "USB Headset");
        assert!(!found.is_default);

        assert!(resolve_device(&backend, "usb headset").is_none());
        assert!(resolve_device(&backend, "USB").is_none());
        assert!(resolve_device(&backend, "nonexistent-device-xyz").is_none());
    }

    #[test]
    fn default_is_the_first_device_added() {
        let backend = backend();
        assert_eq!(default_device(&backend).unwrap().name, "Built-in Microphone");

        backend.remove_device("Built-in Microphone");
        assert_eq!(default_device(&backend).unwrap().name, "USB Headset");
        assert!(default_device(&SyntheticBackend::new()).is_none());
    }

    #[test]
    fn enumerates_every_input() {
        let names: Vec<String> = input_devices(&backend()).unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["Built-in Microphone", "USB Headset"]);
    }

    #[test]
    fn stale_identity_fails_to_bind() {
        let backend = backend();
        let headset = resolve_device(&backend, "USB Headset").unwrap();
        let mut graph = backend.open_graph().unwrap();
        backend.remove_device("USB Headset");

        assert!(!bind_device(&headset, &mut graph));
        assert_eq!(graph.bound_device().name, "Built-in Microphone");
    }

    #[test]
    fn binds_present_device() {
        let backend = backend();
        let headset = resolve_device(&backend, "USB Headset").unwrap();
        let mut graph = backend.open_graph().unwrap();

        assert!(bind_device(&headset, &mut graph));
        assert_eq!(graph.native_format().unwrap().sample_rate, 44_100);
    }
}
