//! COM apartment scoping for the calling thread.

use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

/// Joins the multithreaded apartment for its lifetime.
///
/// If the thread already lives in an STA (`RPC_E_CHANGED_MODE`) COM is still
/// usable and nothing is undone on drop.
pub(crate) struct ComApartment {
    initialized: bool,
}

impl ComApartment {
    pub fn enter() -> Self {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        Self {
            initialized: hr.is_ok(),
        }
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}
