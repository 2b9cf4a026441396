use serde::Serialize;

/// A hardware input device as reported by a platform backend.
///
/// `handle` is opaque to the engine (an endpoint id on Windows, a synthetic
/// key for software devices). `name` is the display name callers match on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceIdentity {
    pub handle: String,
    pub name: String,
    pub is_default: bool,
}

impl DeviceIdentity {
    pub fn new(handle: impl Into<String>, name: impl Into<String>, is_default: bool) -> Self {
        Self {
            handle: handle.into(),
            name: name.into(),
            is_default,
        }
    }

    /// Whether both identities refer to the same hardware endpoint.
    pub fn same_device(&self, other: &DeviceIdentity) -> bool {
        self.handle == other.handle
    }
}
